use std::fs;
use std::path::Path;

use clap::CommandFactory;

// cli.rs only pulls in clap and clap_complete, both build-dependencies.
#[path = "src/cli.rs"]
mod cli;

fn main() {
    println!("cargo::rerun-if-changed=src/cli.rs");

    let out_dir = std::env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo");
    let man_dir = Path::new(&out_dir).join("man");
    fs::create_dir_all(&man_dir).expect("create man directory");

    let root = cli::Cli::command();
    write_page(&root, &man_dir);

    // One page per subcommand: buson-run.1, buson-config.1, ...
    for sub in root.get_subcommands().filter(|s| !s.is_hide_set()) {
        let page = sub.clone().name(format!("buson-{}", sub.get_name()));
        write_page(&page, &man_dir);
    }
}

fn write_page(cmd: &clap::Command, dir: &Path) {
    let path = dir.join(format!("{}.1", cmd.get_name()));
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd.clone())
        .render(&mut buf)
        .unwrap_or_else(|e| panic!("render {}: {e}", path.display()));
    fs::write(&path, buf).unwrap_or_else(|e| panic!("write {}: {e}", path.display()));
}

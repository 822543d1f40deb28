use std::{env, process};

use fat32::{logger, MountMode, MountOptions};
use fat_api_types::fs::FsResult;
use log::LevelFilter;

mod server;

const USAGE: &str = "\
usage: fat_fs [-d] [-r] [--no-log] VOLUME COMMAND [ARGS]

commands:
  info                  volume geometry and free space
  ls [PATH]             list a directory
  stat PATH             show file attributes
  cat PATH              print a file
  write PATH [OFFSET]   write stdin into a file, creating it if needed
  touch PATH            create a file or refresh its times
  mkdir PATH            create a directory
  rm PATH               remove a file
  rmdir PATH            remove an empty directory
  truncate PATH SIZE    shrink a file

options:
  -d          debug logging (FAT_FS_LOG=<level> overrides)
  -r          mount read-only
  --no-log    don't record reads and writes in /fs.log
  -h          show this help";

fn exit_with(code: FsResult) -> ! {
    process::exit(u64::from(code) as i32)
}

fn main() {
    let mut level = LevelFilter::Warn;
    let mut options = MountOptions::default();
    let mut positional = Vec::new();

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-d" => level = LevelFilter::Debug,
            "-r" => options.mode = MountMode::ReadOnly,
            "--no-log" => options.activity_log = false,
            "-h" | "--help" => {
                println!("{USAGE}");
                return;
            }
            flag if flag.starts_with('-') && positional.len() < 2 => {
                eprintln!("fat_fs: unknown option {flag}\n\n{USAGE}");
                exit_with(FsResult::InvalidArgument);
            }
            _ => positional.push(arg),
        }
    }

    if let Err(e) = logger::init(logger::level_from_env(level)) {
        eprintln!("fat_fs: {e}");
    }

    let Some((image, args)) = positional.split_first() else {
        eprintln!("{USAGE}");
        exit_with(FsResult::InvalidArgument);
    };
    if args.is_empty() {
        eprintln!("{USAGE}");
        exit_with(FsResult::InvalidArgument);
    }

    exit_with(server::run(image, options, args));
}

//! Command-line driver for the machedit Mach-O editor.
//!
//! Every container operation is exposed as a subcommand operating on the
//! file in place.

use clap::{Parser, Subcommand};
use machedit::Container;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "machedit")]
#[command(about = "In-place editor for thin and fat Mach-O binaries")]
struct Cli {
    /// Mach-O file to edit
    file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the container structure
    Info,

    /// Promote a thin binary to a single-slice fat binary
    Fat,

    /// Collapse a fat binary to the thin file of one slice
    Thin {
        /// Index of the slice to keep
        arch: usize,
    },

    /// Write one slice to a standalone executable file
    Extract {
        arch: usize,
        output: PathBuf,
    },

    /// Remove a slice and repack the remaining ones
    RemoveArch {
        arch: usize,
    },

    /// Append a slice copied from another Mach-O file
    InsertArch {
        /// Donor file
        donor: PathBuf,
        /// Index of the slice to copy from the donor
        arch: usize,
    },

    /// Remove a load command from a slice
    RemoveLc {
        arch: usize,
        index: usize,
    },

    /// Move a load command to another position in the table
    MoveLc {
        arch: usize,
        from: usize,
        to: usize,
    },

    /// Append a raw load command read from a file
    InsertLc {
        arch: usize,
        /// File holding the command payload in the slice's byte order
        payload: PathBuf,
    },

    /// Change a slice's Mach-O file type (e.g. 2 = executable, 6 = dylib)
    SetFiletype {
        arch: usize,
        filetype: u32,
    },

    /// Strip a slice's code signature and repair __LINKEDIT
    RemoveCodesig {
        arch: usize,
    },
}

/// Exit with a message when a slice index is out of range; the library
/// treats bad indices as programming errors.
fn check_arch(container: &Container, arch: usize) {
    if arch >= container.archs().len() {
        eprintln!(
            "no arch {arch}: the file has {} slice(s)",
            container.archs().len()
        );
        std::process::exit(1);
    }
}

fn check_lc(container: &Container, arch: usize, index: usize) {
    let n_commands = container.archs()[arch].commands.len();
    if index >= n_commands {
        eprintln!("no load command {index}: arch {arch} has {n_commands} command(s)");
        std::process::exit(1);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    let mut container = Container::open(&cli.file)?;
    match cli.command {
        Command::Info | Command::Fat | Command::InsertArch { .. } => {}
        Command::Thin { arch }
        | Command::Extract { arch, .. }
        | Command::RemoveArch { arch }
        | Command::RemoveLc { arch, .. }
        | Command::MoveLc { arch, .. }
        | Command::InsertLc { arch, .. }
        | Command::SetFiletype { arch, .. }
        | Command::RemoveCodesig { arch } => check_arch(&container, arch),
    }

    match cli.command {
        Command::Info => {
            print!("{}", container.describe());
        }
        Command::Fat => {
            if container.is_fat() {
                eprintln!("already a fat binary");
                std::process::exit(1);
            }
            container.make_fat()?;
        }
        Command::Thin { arch } => {
            if !container.is_fat() {
                eprintln!("already a thin binary");
                std::process::exit(1);
            }
            container.make_thin(arch)?;
        }
        Command::Extract { arch, output } => {
            if !container.save_arch_to(arch, &output)? {
                eprintln!("couldn't create {}", output.display());
                std::process::exit(1);
            }
            println!("extracted arch {arch} to {}", output.display());
        }
        Command::RemoveArch { arch } => {
            if !container.is_fat() {
                eprintln!("can't remove the only slice of a thin binary");
                std::process::exit(1);
            }
            container.remove_arch(arch)?;
        }
        Command::InsertArch { donor, arch } => {
            let donor = Container::open(&donor)?;
            check_arch(&donor, arch);
            if !container.is_fat() {
                container.make_fat()?;
            }
            container.insert_arch_from(&donor, arch)?;
        }
        Command::RemoveLc { arch, index } => {
            check_lc(&container, arch, index);
            container.remove_load_command(arch, index)?;
        }
        Command::MoveLc { arch, from, to } => {
            check_lc(&container, arch, from);
            check_lc(&container, arch, to);
            container.move_load_command(arch, from, to)?;
        }
        Command::InsertLc { arch, payload } => {
            let payload = std::fs::read(&payload)?;
            container.insert_load_command(arch, &payload)?;
        }
        Command::SetFiletype { arch, filetype } => {
            container.change_file_type(arch, filetype)?;
        }
        Command::RemoveCodesig { arch } => {
            if !container.remove_codesignature(arch)? {
                eprintln!("slice {arch} has no removable code signature");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

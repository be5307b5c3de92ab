//! `citcrun <file.exe>`: activates a PE32+ image against the Win32/D3D11
//! surrogate layer and transfers control to its entry point (spec.md §6).

use std::ffi::CString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::error;

use citcrun::loader;
use citcrun::loader::headers::parse_headers;
use citcrun::runtime::Runtime;
use citcrun::win32;

#[derive(Parser)]
#[command(name = "citcrun", about = "A userspace loader and Win32/D3D11 runtime for PE32+ executables")]
struct Cli {
    /// Parse and print the image's headers and section table, then exit
    /// without mapping or executing it.
    #[arg(long)]
    info: bool,

    /// Path to the PE32+ executable to run.
    executable: PathBuf,

    /// Arguments passed through to the guest's command line.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    guest_args: Vec<String>,
}

/// Builds the Win32-style command line a guest's `GetCommandLineA` expects:
/// the executable path, quoted, followed by any trailing arguments joined
/// with spaces (spec.md §4.3's `env` stubs).
fn build_command_line(cli: &Cli) -> CString {
    let mut line = format!("\"{}\"", cli.executable.display());
    for arg in &cli.guest_args {
        line.push(' ');
        line.push_str(arg);
    }
    CString::new(line).unwrap_or_else(|_| CString::new("").unwrap())
}

fn print_info(binary: &[u8]) -> ExitCode {
    let headers = match parse_headers(binary) {
        Ok(headers) => headers,
        Err(err) => {
            eprintln!("citcrun: failed to parse headers: {err}");
            return ExitCode::FAILURE;
        }
    };
    println!("machine: {:#06x}", headers.coff.machine);
    println!("entry point rva: {:#010x}", headers.optional.address_of_entry_point);
    println!("preferred image base: {:#018x}", headers.optional.image_base);
    println!("size of image: {:#x}", headers.optional.size_of_image);
    println!("sections:");
    for section in &headers.sections {
        println!("  {:<8} va={:#010x} vsize={:#x} rawsize={:#x} flags={:?}", section.name_str(), section.virtual_address, section.virtual_size, section.size_of_raw_data, section.flags());
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let binary = match std::fs::read(&cli.executable) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!("failed to read {}: {err}", cli.executable.display());
            return ExitCode::FAILURE;
        }
    };

    if cli.info {
        return print_info(&binary);
    }

    Runtime::init(build_command_line(&cli));
    let stubs = win32::stub_table();

    let image = match loader::activate(&binary, &stubs) {
        Ok(image) => image,
        Err(err) => {
            error!("failed to activate {}: {err}", cli.executable.display());
            return ExitCode::FAILURE;
        }
    };

    // Never returns on success: the guest is expected to call
    // `ExitProcess`, at which point this process has already exited.
    unsafe { image.run() }
}

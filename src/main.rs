use clap::Parser;
use era5_processor::cli::{args::Args, commands};
use std::process;

fn main() {
    let args = Args::parse();

    // If no subcommand was provided, show the command overview
    if args.command.is_none() {
        show_help_and_commands();
        process::exit(0);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    match runtime.block_on(commands::run(args)) {
        Ok(()) => process::exit(0),
        Err(error) => {
            eprintln!("Error: {}", error);
            process::exit(1);
        }
    }
}

/// Show help information when no subcommand is provided
fn show_help_and_commands() {
    println!("ERA5 Processor - GRIB to Joined Table Pipeline");
    println!("==============================================");
    println!();
    println!("Convert raw ERA5 GRIB archives into per-variable tables, join them on");
    println!("the (time, latitude, longitude) coordinate key, and sort the joined");
    println!("output chronologically.");
    println!();
    println!("USAGE:");
    println!("    era5-processor <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    run         Run the full pipeline over a directory of GRIB files");
    println!("    extract     Extract one raw GRIB file into per-variable tables");
    println!("    join        Join the variable tables of one (year, month) unit");
    println!("    sort        Chronologically sort joined files under a directory");
    println!();
    println!("EXAMPLES:");
    println!("    # Full pipeline with the chronological sort pass:");
    println!("    era5-processor run --input /data/grib --output /data/era5 \\");
    println!("                       --sort-chronologically");
    println!();
    println!("    # Join one month from already extracted tables:");
    println!("    era5-processor join --input /data/era5/processed \\");
    println!("                        --output /data/era5/joined/2021/joined_202105.parquet \\");
    println!("                        --year 2021 --month 05");
    println!();
    println!("For detailed help on any command, use:");
    println!("    era5-processor <COMMAND> --help");
}

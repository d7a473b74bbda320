mod sim;
mod store;

use std::env;
use std::process;

use sim::{SimOptions, SupplyProfile};

fn main() {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!(
            "Usage: harvester-emulator [--profile <steady|cloudy|night>] [--minutes <n>] [--inject-crash]"
        );
        process::exit(2);
    });

    println!(
        "Harvester node emulator: profile {:?}, {} simulated minute(s)",
        options.profile, options.minutes
    );

    for line in sim::run(&options) {
        println!("{line}");
    }
}

fn parse_options() -> Result<SimOptions, String> {
    let mut options = SimOptions {
        profile: SupplyProfile::Steady,
        minutes: 3,
        inject_crash: false,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--profile=") {
            options.profile = SupplyProfile::from_tag(value)?;
        } else if arg == "--profile" {
            let value = args.next().ok_or("Expected value after --profile")?;
            options.profile = SupplyProfile::from_tag(&value)?;
        } else if let Some(value) = arg.strip_prefix("--minutes=") {
            options.minutes = parse_minutes(value)?;
        } else if arg == "--minutes" {
            let value = args.next().ok_or("Expected value after --minutes")?;
            options.minutes = parse_minutes(&value)?;
        } else if arg == "--inject-crash" {
            options.inject_crash = true;
        } else {
            return Err(format!("Unknown argument `{arg}`"));
        }
    }

    Ok(options)
}

fn parse_minutes(value: &str) -> Result<u64, String> {
    match value.parse::<u64>() {
        Ok(minutes) if (1..=1_440).contains(&minutes) => Ok(minutes),
        _ => Err(format!("Invalid minute count `{value}` (expected 1-1440)")),
    }
}

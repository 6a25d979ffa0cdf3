use std::env;
use std::process;

use dynclamp_backend::defaults::Defaults;
use dynclamp_backend::error::Result;
use dynclamp_backend::parse::compile_cli;
use dynclamp_backend::stimulus::write_pulse_train;
use dynclamp_backend::topology::{io_configuration, ChannelDescriptor};

fn run(args: &[String]) -> Result<()> {
    if !args.is_empty() {
        // Treat the command line as stimulus fragments and compile them.
        let duration = compile_cli(args, "stimulus.stim", false)?;
        println!("stimulus.stim: {} s", duration);
        return Ok(());
    }

    // Demo: a pulse-train stimulus and the plain I/O document that plays it.
    let duration = write_pulse_train("pulses.stim", 10., 1., 500., 3, 0.5, false)?;
    let defaults = Defaults::from_env();
    let channels = [
        ChannelDescriptor::input().channel(0),
        ChannelDescriptor::output().channel(0).stimfile("pulses.stim"),
    ];
    let doc = io_configuration(
        &channels,
        defaults.realtime,
        &defaults,
        defaults.sampling_rate,
        duration,
    )?;
    doc.write("experiment.json")?;
    println!("pulses.stim: {} s, experiment.json written", duration);
    Ok(())
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if let Err(e) = run(&args) {
        eprintln!("{}", e);
        process::exit(1);
    }
}

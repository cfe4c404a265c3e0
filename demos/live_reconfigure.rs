//! Play through the default output device and rewire the chain while it plays.
//!
//! Run with: cargo run --example live_reconfigure --features cpal_sink
//!
//! A fifth above the base tone is connected and disconnected every second,
//! each time under suspend/resume, while the stream keeps pulling blocks.

use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use dspchain::nodes::{Gain, Mixer, Sine, SineMessage};
use dspchain::{Context, CpalDevice, DeviceManager};

fn main() -> dspchain::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let device = match CpalDevice::default_output() {
        Some(device) => Arc::new(device.with_block_size(128)),
        None => {
            eprintln!("No audio output devices found!");
            return Ok(());
        }
    };
    println!("Using: {} @ {}Hz, {} ch", device.name(), device.sample_rate(), device.channels());

    let (sink, consumer) = device.create_sink();
    let context = Context::new(device.clone());
    let chain = context.create_chain();

    let (mut base, fifth, mixer) = chain.with(|c| -> dspchain::Result<_> {
        let base = c.add(Sine::new(220.0))?;
        let fifth = c.add(Sine::new(330.0))?.id();
        let mixer = c.add(Mixer::new(2))?.id();
        let gain = c.add(Gain::new(0.5))?.id();
        let sink = c.add(sink)?.id();

        c.connect(base.id(), 0, mixer, 0)?;
        c.connect(mixer, 0, gain, 0)?;
        c.connect(gain, 0, sink, 0)?;
        c.start()?;
        Ok((base, fifth, mixer))
    })?;

    let stream = device.play(consumer)?;
    println!("Playing... (10 seconds)");

    for second in 0..10 {
        sleep(Duration::from_secs(1));

        let mut c = chain.suspend()?;
        if second % 2 == 0 {
            c.connect(fifth, 0, mixer, 1)?;
        } else {
            c.disconnect(fifth, 0, mixer, 1)?;
        }
        c.resume()?;

        let _ = base.send(SineMessage::SetFrequency(220.0 + 20.0 * second as f32));
        if stream.check_underrun() {
            println!("underrun during second {}", second);
        }
    }

    println!(
        "blocks: {}, skipped: {}",
        chain.lock().blocks_processed(),
        chain.skipped()
    );
    Ok(())
}

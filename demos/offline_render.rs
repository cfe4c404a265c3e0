//! Render a chain without an audio device and rewire it halfway through.
//!
//! Run with: cargo run --example offline_render
//!
//! Renders two seconds: a 220Hz sine for the first second, then a 330Hz
//! sine is mixed in under suspend/resume while the clock keeps running.

use std::sync::Arc;

use dspchain::nodes::{Gain, GainMessage, Mixer, RtrbSink, Sine};
use dspchain::{Context, DeviceSettings, OfflineDevice};

fn main() -> dspchain::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = DeviceSettings::new(48_000, 64);
    let device = Arc::new(OfflineDevice::new(settings));
    let context = Context::new(device.clone());
    let chain = context.create_chain();

    let (producer, mut consumer) = rtrb::RingBuffer::new(settings.sample_rate as usize * 2);
    let blocks_per_second = settings.sample_rate as usize / settings.block_size;

    let (low, high, mixer, mut gain) = chain.with(|c| -> dspchain::Result<_> {
        let low = c.add(Sine::new(220.0).with_amplitude(0.5))?.id();
        let high = c.add(Sine::new(330.0).with_amplitude(0.5))?.id();
        let mixer = c.add(Mixer::new(2))?.id();
        let gain = c.add(Gain::new(0.8))?;
        let sink = c.add(RtrbSink::mono(producer))?.id();

        c.connect(low, 0, mixer, 0)?;
        c.connect(mixer, 0, gain.id(), 0)?;
        c.connect(gain.id(), 0, sink, 0)?;
        c.start()?;
        Ok((low, high, mixer, gain))
    })?;

    device.run(blocks_per_second);

    {
        let mut c = chain.suspend()?;
        c.connect(high, 0, mixer, 1)?;
        c.resume()?;
    }
    gain.send(GainMessage::SetGain(0.5)).ok();
    device.run(blocks_per_second);

    let mut peak = 0.0f32;
    let mut sum_sq = 0.0f64;
    let mut count = 0usize;
    while let Ok(sample) = consumer.pop() {
        peak = peak.max(sample.abs());
        sum_sq += (sample as f64).powi(2);
        count += 1;
    }

    let c = chain.lock();
    println!("order:    {:?}", c.order());
    println!("blocks:   {}", c.blocks_processed());
    println!("samples:  {}", count);
    println!("peak:     {:.3}", peak);
    println!("rms:      {:.3}", (sum_sq / count.max(1) as f64).sqrt());
    println!("low node: {}", low);
    Ok(())
}

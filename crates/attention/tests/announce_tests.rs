use std::sync::atomic::{AtomicUsize, Ordering};

use attention::masks::additive_padding_mask;
use attention::{AdditiveAttention, Attention, AttentionNames, Config};
use candle_core::{Device, Result, Tensor};
use layers::Graph;
use log::{Level, Log, Metadata, Record};

/// Counts info records about the attention kernel.
struct KernelLines(AtomicUsize);

impl Log for KernelLines {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if record.level() == Level::Info && record.args().to_string().starts_with("additive attention") {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn flush(&self) {}
}

static LINES: KernelLines = KernelLines(AtomicUsize::new(0));

#[test]
fn kernel_is_announced_once_per_process() -> Result<()> {
    log::set_logger(&LINES).expect("logger installed once");
    log::set_max_level(log::LevelFilter::Info);

    let device = Device::Cpu;
    let mut graph = Graph::new(device.clone(), 2);
    let context = Tensor::randn(0f32, 1.0, (2, 4, 3), &device)?;
    let state = Tensor::randn(0f32, 1.0, (2, 3), &device)?;
    let mask = additive_padding_mask(&device, &[1.0; 6], 2, 3)?;

    // A rebuilt model constructs fresh attention blocks for every batch.
    for _ in 0..5 {
        let attention =
            AdditiveAttention::new(Config::new(3, 4, 4), AttentionNames::with_prefix("decoder"))
                .expect("valid dimensions");
        let mapped = attention.precompute(&mut graph, &context).expect("precompute");
        attention
            .attend(&mut graph, &state, &context, &mapped, &mask)
            .expect("attend");
        graph.reset();
    }
    assert_eq!(LINES.0.load(Ordering::SeqCst), 1);
    Ok(())
}

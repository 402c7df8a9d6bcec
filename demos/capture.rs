//! Captures 10 seconds of video from the first UVC device into `frame{n}.{ext}` files in the
//! current directory.
//!
//! Run with `RUST_LOG=info` (or `debug`) to see per-frame output.

use uvcap::{
    capture::{self, CaptureConfig, FileSink},
    control::AutoExposureMode,
    UvcContext,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let ctx = UvcContext::new()?;
    log::info!("UVC context initialized");

    let devices = ctx.devices()?;
    log::info!("devices: {}", devices.len());
    drop(devices);

    let desc = ctx.find_device(0, 0, None)?;
    log::info!(
        "device found: {:04x}:{:04x} (bus {}, address {})",
        desc.vendor_id(),
        desc.product_id(),
        desc.bus_number(),
        desc.address()
    );

    let dev = desc.open()?;
    match (dev.read_manufacturer_string(), dev.read_product_string()) {
        (Ok(manufacturer), Ok(product)) => log::info!("device opened: [{}] {}", manufacturer, product),
        _ => log::info!("device opened"),
    }

    dev.set_ae_mode(AutoExposureMode::MANUAL)?;

    log::info!("device control interface:\n{:#?}", dev.topology());
    for (i, interface) in dev.streaming_interfaces().iter().enumerate() {
        log::info!("stream interface {}: {:?}", i, interface.id());
        for (j, format) in interface.formats().iter().enumerate() {
            log::info!("format descriptor {}: {}\n{:#?}", j, format.frame_format(), format.kind());
            for (k, frame) in format.frames().iter().enumerate() {
                log::info!("frame descriptor {}:\n{:#?}", k, frame);
            }
        }
    }

    let interface_id = match dev.streaming_interfaces().first() {
        Some(interface) => interface.id(),
        None => return Err("device has no streaming interfaces".into()),
    };
    let mut interface = dev.streaming_interface_by_id(interface_id)?;
    let params = interface.default_params()?;
    let ctrl = interface.negotiate(&params)?;
    log::info!("stream ctrl:\n{:#?}", ctrl);

    let session = interface.open_stream(ctrl)?;

    let config = CaptureConfig::default();
    let mut sink = FileSink::create(&config.output_dir)?;
    let report = capture::capture(session, &config, &mut sink)?;
    println!(
        "captured {} frames in {:.1?} into {}",
        report.frames,
        report.elapsed,
        sink.dir().display()
    );

    dev.close()?;
    Ok(())
}

use kdf_importer::open;
use kdf_importer::KdfError;

fn main() -> Result<(), KdfError> {
    env_logger::init();

    // Open a KDF file (header only; no sample data is read yet)
    let reader = open("data/sample_capture.kdf")?;

    // Print basic file information
    let header = reader.header();
    println!("Device: {}", header.device_id);
    println!("Subject: {}", header.subject_info);
    println!("Recorded: {} (t0 = {})", header.datetime, header.t0);
    println!("Sample rate: {} Hz", header.sample_rate);
    println!("System gain code: {}", header.system_gain);
    println!("Usable channels: {}", header.usable_channels());

    // List the first few active channels
    let channels = reader.channels();
    println!("\nActive channels:");
    for (number, label) in channels
        .numbers()
        .iter()
        .zip(channels.labels())
        .take(5)
    {
        println!("  {}: {}", number, label);
    }
    if channels.len() > 5 {
        println!("  ... and {} more", channels.len() - 5);
    }

    // Decode the first active channel by number
    let first = channels.numbers()[0];
    let channel = reader.read(Some(first), None)?;

    println!(
        "\nChannel {} ({}): {} samples over {} seconds",
        channel.metadata.number,
        channel.metadata.label,
        channel.samples.len(),
        channel.metadata.duration
    );

    let preview = channel.samples.len().min(5);
    println!("First {} calibrated samples:", preview);
    for (i, value) in channel.samples.iter().take(preview).enumerate() {
        println!("  {}: {:.3}", i, value);
    }

    // The same channel, keeping every fourth sample of each second
    let decimated = reader.read_decimated(Some(first), None, 4)?;
    println!(
        "\nDecimated by 4: {} samples at an effective {} Hz",
        decimated.samples.len(),
        decimated.metadata.sample_rate / 4
    );

    Ok(())
}

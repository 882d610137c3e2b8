//! Crop Verification Example
//!
//! Checks whether a crop was cut out of a reference image, prints the
//! verification log, saves the overlay and writes a JSON report.
//!
//! Run with: cargo run --example verify_crop -- <reference> <crop> [output_dir] [config.json]

use crop_forensics::{
    CropVerifier, VerificationConfig,
    error::Result,
    report::{JsonReportRenderer, generate_report},
};
use std::env;
use std::fs;
use std::path::Path;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        println!("Crop Forensics - Crop Verification Example");
        println!("==========================================");
        println!();
        println!("Usage: {} <reference> <crop> [output_dir] [config.json]", args[0]);
        println!();
        println!("Arguments:");
        println!("  reference   - Image the crop supposedly comes from");
        println!("  crop        - Image to verify");
        println!("  output_dir  - Optional output directory (default: ./output)");
        println!("  config.json - Optional verification settings");
        println!();
        println!("Example:");
        println!("  {} photo.jpg detail.png ./results", args[0]);
        return Ok(());
    }

    let reference_path = &args[1];
    let crop_path = &args[2];
    let output_dir = args.get(3).map(|s| s.as_str()).unwrap_or("./output");

    let config = match args.get(4) {
        Some(path) => VerificationConfig::from_json_str(&fs::read_to_string(path)?)?,
        None => VerificationConfig::default(),
    };

    fs::create_dir_all(output_dir)?;

    println!("Reference: {}", reference_path);
    println!("Crop:      {}", crop_path);
    println!("Output:    {}", output_dir);
    println!();

    let verifier = CropVerifier::new().with_config(config);
    let result = match verifier.verify(reference_path, crop_path) {
        Ok(result) => result,
        Err(e) if e.is_load_error() => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e),
    };

    println!("Verification log");
    println!("----------------");
    for line in result.log.lines() {
        println!("  {}", line);
    }
    println!();

    println!("Verdict: {}", result.verdict);
    if let Some(localization) = &result.localization {
        println!("  Inliers:     {}", result.stats.inliers);
        println!("  Inlier RMS:  {:.2} px", localization.inlier_rms);
        for (name, corner) in ["top-left", "top-right", "bottom-right", "bottom-left"]
            .iter()
            .zip(localization.footprint.iter())
        {
            println!("  {:<12} ({:.1}, {:.1})", name, corner.x, corner.y);
        }
    }
    println!();

    let overlay_output = format!("{}/overlay.png", output_dir);
    if result.save_overlay(&overlay_output)? {
        println!("Overlay saved to {}", overlay_output);
    }

    let report_output = Path::new(output_dir).join("report.json");
    generate_report(&JsonReportRenderer, &result, reference_path, crop_path, &report_output)?;
    println!("Report saved to {}", report_output.display());

    Ok(())
}

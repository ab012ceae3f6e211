use std::env;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use qball_volume::{
    Orientation, QBallReconstructionFilter, ScalarVolume, VolumeLoader,
    config::{PreviewConfig, load_config},
    export::{write_odf_volume, write_preview, write_scalar_volume},
};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "qball-volume".to_string());
    let config_path = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| format!("Usage: {program} <config.json>"))?;

    let config = load_config(&config_path)?;
    let volume = VolumeLoader::load_dwi_from_directories(&config.channels, config.sort_by)?;
    let (d, h, w) = volume.dim();
    info!("Loaded {} channels of {d}x{h}x{w}", volume.channels());

    let filter = QBallReconstructionFilter::new(config.gradient_table(), config.reconstruction.clone());
    let output = filter.run(&volume)?;

    let out_dir = &config.output.dir;
    fs::create_dir_all(out_dir)?;
    let odf = write_odf_volume(&out_dir.join("odf"), &output.odf)?;
    info!("ODFs written to {}", odf.raw.display());
    write_scalar_volume(&out_dir.join("baseline"), &output.baseline)?;

    let gfa = config.output.write_gfa.then(|| output.odf.gfa());
    if let Some(gfa) = &gfa {
        write_scalar_volume(&out_dir.join("gfa"), gfa)?;
    }

    if let Some(preview) = &config.output.preview {
        save_preview(out_dir, "baseline", &output.baseline, preview)?;
        if let Some(gfa) = &gfa {
            save_preview(out_dir, "gfa", gfa, preview)?;
        }
    }
    Ok(())
}

fn save_preview(
    dir: &Path,
    name: &str,
    volume: &ScalarVolume,
    preview: &PreviewConfig,
) -> Result<(), Box<dyn Error>> {
    let (d, h, w) = volume.dim();
    let index = preview.slice.unwrap_or(match preview.orientation {
        Orientation::Axial => d / 2,
        Orientation::Coronal => h / 2,
        Orientation::Sagittal => w / 2,
    });
    let image = volume
        .get_image_from_axis(index, preview.orientation, preview.interpolation)
        .ok_or_else(|| format!("Slice {index} is outside the {name} volume"))?;
    let path = dir.join(format!("{name}.png"));
    write_preview(&path, &image)?;
    info!("Preview written to {}", path.display());
    Ok(())
}

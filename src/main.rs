use std::env;
use std::path::PathBuf;
use structure_detector::io::{load_patch, load_profile, write_json_file};
use structure_detector::types::GeoPoint;
use structure_detector::{DetectorProfile, ElevationPatch, StructureDetector};

const USAGE: &str = "usage: structure-detector [profile.json] [patch.json] [--json out.json]";

struct CliArgs {
    profile: Option<PathBuf>,
    patch: Option<PathBuf>,
    json_out: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn parse_cli() -> Result<CliArgs, String> {
    let mut positional = Vec::new();
    let mut json_out = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => {
                let path = args.next().ok_or_else(|| format!("--json needs a path\n{USAGE}"))?;
                json_out = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown flag {flag}\n{USAGE}")),
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    if positional.len() > 2 {
        return Err(USAGE.to_string());
    }
    let mut positional = positional.into_iter();
    Ok(CliArgs {
        profile: positional.next(),
        patch: positional.next(),
        json_out,
    })
}

fn run() -> Result<(), String> {
    let cli = parse_cli()?;

    let profile = match &cli.profile {
        Some(path) => load_profile(path).map_err(|e| e.to_string())?,
        None => DetectorProfile::windmill(),
    };
    let patch = match &cli.patch {
        Some(path) => load_patch(path).map_err(|e| e.to_string())?,
        None => synthetic_mound(&profile).map_err(|e| e.to_string())?,
    };

    let detector = StructureDetector::new(profile).map_err(|e| e.to_string())?;
    let result = detector.detect(&patch).map_err(|e| e.to_string())?;
    print!("{}", result.summary());

    if let Some(path) = &cli.json_out {
        write_json_file(path, &result).map_err(|e| e.to_string())?;
        println!("\nJSON report written to {}", path.display());
    }
    Ok(())
}

/// Paraboloid mound, 8 m tall and 16 m across, centred in a patch sized
/// from the profile geometry.
fn synthetic_mound(
    profile: &DetectorProfile,
) -> structure_detector::Result<ElevationPatch> {
    let g = &profile.geometry;
    let res = g.resolution_m;
    let w = (g.patch_size_m[0] / res).round() as usize;
    let h = (g.patch_size_m[1] / res).round() as usize;
    let radius = 8.0f32;
    let (cx, cy) = ((w as f32 - 1.0) * 0.5, (h as f32 - 1.0) * 0.5);
    let mut data = Vec::with_capacity(w * h);
    for y in 0..h {
        for x in 0..w {
            let dx = (x as f32 - cx) * res;
            let dy = (y as f32 - cy) * res;
            let r2 = (dx * dx + dy * dy) / (radius * radius);
            data.push(8.0 * (1.0 - r2).max(0.0));
        }
    }
    ElevationPatch::new(w, h, res, data, GeoPoint::new(52.0907, 5.1214))
}

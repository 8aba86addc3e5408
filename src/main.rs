//! APR Index CLI - Build an APR of a synthetic image from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use apr_index::{
    Apr, AprBuilder, AprError, ExtraParticleData, MeshData, RunConfig,
    compute::{
        adaptive_max, adaptive_min, fill_tree_mean, interp_img, neighbour_mean,
        pull_down_tree_to_particles, sample_image,
    },
    io::{read_apr, write_apr},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json>", args[0]);
        eprintln!();
        eprintln!("Build an APR of a synthetic image and run the particle pipelines on it.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to run configuration file");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: RunConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = run(&config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(config: &RunConfig) -> Result<(), AprError> {
    config.validate()?;

    let dims = config.image_dims();
    let level_min = config.level_min;
    let level_max = config.resolved_level_max();
    let shape = &config.shape;

    println!("APR Construction");
    println!("================");
    println!("Image: {}x{}x{} (y, x, z)", dims.y_num, dims.x_num, dims.z_num);
    println!("Levels: {}..={}", level_min, level_max);
    println!("Status particles: {:?}", config.status_particles);
    println!();

    let start = Instant::now();
    let mut builder = AprBuilder::new(dims, level_min, level_max)?
        .with_status_table(config.status_table()?);
    builder.insert_required_levels(|y, x, z| shape.required_level(dims, level_max, y, x, z))?;
    let topology = builder.build_topology()?;

    let image = MeshData::from_fn(dims, |y, x, z| {
        shape.intensity(dims, y, x, z).round().clamp(0.0, u16::MAX as f32) as u16
    });
    let intensities = sample_image(&topology, &image)?;
    let apr = Apr::new(topology, intensities)?;
    log::info!("built APR in {:.3}s", start.elapsed().as_secs_f32());

    println!("Particles: {}", apr.total_number_particles());
    println!("Computational ratio: {:.2}", apr.computational_ratio());
    for level in apr.level_min()..=apr.level_max() {
        let range = apr.topology().level_particles(level);
        println!("  Level {}: {} particles", level, range.end - range.start);
    }
    println!();

    // Reconstruction
    let start = Instant::now();
    let reconstruction = interp_img(apr.topology(), apr.intensities())?;
    println!(
        "Reconstruction mean abs error: {:.4} ({:.3}s)",
        mean_abs_error(&image, &reconstruction),
        start.elapsed().as_secs_f32()
    );

    // Tree aggregation and pull-down
    let start = Instant::now();
    let tree = apr.tree()?;
    let tree_means = fill_tree_mean(apr.topology(), &tree, apr.intensities())?;
    let mut pulled = ExtraParticleData::<f32>::default();
    pull_down_tree_to_particles(
        apr.topology(),
        &tree,
        &tree_means,
        &mut pulled,
        config.tree_level_offset,
    )?;
    println!(
        "Tree: {} parent cells, pulled down {} levels ({:.3}s)",
        tree.total_number_parent_cells(),
        config.tree_level_offset,
        start.elapsed().as_secs_f32()
    );

    // Filtering
    let smoothed = neighbour_mean(apr.topology(), apr.intensities())?;
    let (lo, hi) = value_range(smoothed.as_slice());
    println!("Neighbour mean range: [{:.2}, {:.2}]", lo, hi);

    // Adaptive estimators
    let start = Instant::now();
    let local_min = adaptive_min(&apr, &tree)?;
    let local_max = adaptive_max(&apr, &tree)?;
    let (min_lo, min_hi) = value_range(local_min.as_slice());
    let (max_lo, max_hi) = value_range(local_max.as_slice());
    println!("Adaptive min range: [{:.2}, {:.2}]", min_lo, min_hi);
    println!("Adaptive max range: [{:.2}, {:.2}]", max_lo, max_hi);
    log::info!("adaptive estimators in {:.3}s", start.elapsed().as_secs_f32());

    if let Some(path) = &config.output {
        write_apr(path, &apr, config.compression)?;
        let decoded = read_apr::<u16, _>(path)?;
        if decoded.intensities() != apr.intensities() {
            return Err(AprError::InvalidFormat(format!(
                "{} does not read back to the written APR",
                path.display()
            )));
        }
        println!();
        println!("Wrote {}", path.display());
    }

    Ok(())
}

fn mean_abs_error(a: &MeshData<u16>, b: &MeshData<u16>) -> f64 {
    let total: f64 = a
        .mesh
        .iter()
        .zip(&b.mesh)
        .map(|(&x, &y)| (x as f64 - y as f64).abs())
        .sum();
    total / a.len().max(1) as f64
}

fn value_range(values: &[f32]) -> (f32, f32) {
    values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

fn print_example_config() {
    let config = RunConfig::default();
    match serde_json::to_string_pretty(&config) {
        Ok(json) => {
            println!("Example configuration (config.json):");
            println!("{}", json);
        }
        Err(e) => eprintln!("Error serializing example config: {}", e),
    }
}

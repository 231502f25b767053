//! Load one replacement texture and report what came out of it.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use texreplace::{
    DataFormat, DirectoryVfs, FormatSupport, ReplacedLevelsCache, ReplacedTexture,
    ReplacementDesc, ReplacerConfig, ReplacerContext, ReplacerError, VfsBackend, ZipVfs,
};
use texreplace_formats::libktx::LibKtxTranscoder;
use web_time::Instant;

#[derive(FromArgs, Debug)]
/// Decode replacement texture levels from a directory or zip pack
struct ProbeArgs {
    /// path to a JSON configuration file
    #[argh(option)]
    config: Option<PathBuf>,

    /// load libktx from this path instead of the library search path
    #[argh(option)]
    libktx: Option<PathBuf>,

    /// give up after this many seconds (default 30)
    #[argh(option, default = "30")]
    timeout_secs: u64,

    /// replacement directory or zip archive
    #[argh(positional)]
    source: PathBuf,

    /// file for each mip level, level 0 first
    #[argh(positional)]
    levels: Vec<String>,
}

fn main() -> ExitCode {
    let args: ProbeArgs = argh::from_env();

    let config = match &args.config {
        Some(path) => match ReplacerConfig::load_from_path(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {:?}: {}", path, e);
                return ExitCode::FAILURE;
            }
        },
        None => ReplacerConfig::default(),
    };

    env_logger::Builder::new()
        .filter_level(config.log_level.to_level_filter())
        .parse_default_env()
        .init();

    match run(&args, &config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("Probe failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn open_source(args: &ProbeArgs) -> Result<Arc<dyn VfsBackend>, ReplacerError> {
    if args.source.is_dir() {
        Ok(Arc::new(DirectoryVfs::new(&args.source)?))
    } else {
        Ok(Arc::new(ZipVfs::open(&args.source)?))
    }
}

fn run(args: &ProbeArgs, config: &ReplacerConfig) -> Result<bool, ReplacerError> {
    if args.levels.is_empty() {
        eprintln!("No level files given");
        return Ok(false);
    }

    let vfs = open_source(args)?;
    log::info!("Reading replacements from {}", vfs.describe());
    let mut ctx = ReplacerContext::from_config(vfs, config)?;
    if let Some(path) = &args.libktx {
        match LibKtxTranscoder::load_from(path) {
            Ok(transcoder) => ctx = ctx.with_transcoder(Arc::new(transcoder)),
            Err(e) => log::warn!("Ignoring --libktx: {}", e),
        }
    }
    if ctx.transcoder.is_none() {
        log::warn!("libktx not found, KTX2 replacements will not load");
    }

    let support = config.format_support.unwrap_or_else(FormatSupport::desktop);
    let desc = ReplacementDesc::new(
        args.levels.clone(),
        support,
        args.levels[0].clone(),
        Arc::new(ReplacedLevelsCache::new()),
    );

    let mut texture = ReplacedTexture::new(&ctx);
    texture.finish_populate(desc);

    let start = Instant::now();
    let timeout = Duration::from_secs(args.timeout_secs);
    let mut polls = 0u32;
    while !texture.is_ready(config.poll_budget()) {
        polls += 1;
        if start.elapsed() > timeout {
            eprintln!("Timed out after {} polls in state {}", polls, texture.state());
            return Ok(false);
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    println!("state:  {}", texture.state());
    println!("format: {}", texture.format());
    println!("alpha:  {:?}", texture.alpha_status());
    println!("ready after {} polls, {:.1?}", polls + 1, start.elapsed());

    let mut all_copied = true;
    for level in 0..texture.num_levels() {
        let (Some(w), Some(h), Some(size)) = (
            texture.level_w(level),
            texture.level_h(level),
            texture.level_data_size(level),
        ) else {
            continue;
        };
        let pitch = match texture.format() {
            DataFormat::R8G8B8A8Unorm => w as usize * 4,
            _ => 0,
        };
        let mut buffer = vec![0u8; size];
        let copied = texture.copy_level_to(level, &mut buffer, pitch);
        all_copied &= copied;
        println!(
            "level {}: {}x{}, {} bytes{}",
            level,
            w,
            h,
            size,
            if copied { "" } else { " (copy failed)" }
        );
    }
    Ok(all_copied)
}

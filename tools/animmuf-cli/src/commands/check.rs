//! Check configuration and external tools.

use std::process::ExitCode;

use animmuf_common::config::AppConfig;
use animmuf_frame_store::FrameStore;
use animmuf_render_engine::label::LabelRenderer;
use animmuf_render_engine::CommandConverter;

pub fn run(config: &AppConfig) -> anyhow::Result<ExitCode> {
    println!("AnimMUF Check");
    println!("{}", "=".repeat(50));

    let mut required_ok = true;

    println!("[OK] Target directory: {}", config.target_dir.display());
    match FrameStore::open(config.frames_dir()).and_then(|store| store.timestamps()) {
        Ok(cached) => {
            println!("[OK] Frame cache: {} frames", cached.len());
            if let (Some(first), Some(last)) = (cached.first(), cached.last()) {
                println!("     {first} .. {last}");
            }
        }
        Err(err) => {
            println!("[FAIL] Frame cache: {err}");
            required_ok = false;
        }
    }

    let converter = CommandConverter::from_config(config);
    if converter.is_available() {
        println!("[OK] Converter: {}", converter.program().display());
    } else {
        println!("[FAIL] Converter not found: {}", converter.program().display());
        required_ok = false;
    }

    match &config.font {
        Some(path) => match LabelRenderer::load(path, config.font_size, None) {
            Ok(_) => println!("[OK] Font: {} ({}px)", path.display(), config.font_size),
            Err(err) => println!("[WARN] {err}; frames will not be labeled"),
        },
        None => println!("[WARN] No font configured; frames will not be labeled"),
    }

    println!("[OK] Source: {}", config.source_url);
    println!(
        "     {} x {} at {} ms/frame -> {}",
        config.animation.width,
        config.animation.height,
        config.animation.frame_delay_ms,
        config.video_file.display()
    );

    println!();
    if required_ok {
        println!("Ready.");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Required components are missing. See above.");
        Ok(ExitCode::FAILURE)
    }
}

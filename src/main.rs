use futures::StreamExt;
use sdgen::logger::{self, LoggerConfig};
use sdgen::material::encode_png;
use sdgen::{
    Config, EdgeMode, GenerationParams, GenerationRequest, HighresFix, Img2ImgParams,
    MaterialSettings, NormalMapSynthesizer, Sampler, SdClient,
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dotenv_loaded = dotenv::dotenv().is_ok();

    logger::init_with_config(LoggerConfig::from_env())?;
    logger::log_startup_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    if dotenv_loaded {
        log::info!("✅ .env file loaded successfully");
    } else {
        log::warn!("⚠️  No .env file found, using system environment variables");
    }

    let config = Config::from_env()?;
    logger::log_config_info(&config);

    let output_dir = Path::new(&config.output_folder).join("SDImages");
    fs::create_dir_all(&output_dir)?;

    log::info!("🔄 Creating Stable Diffusion client...");
    let client = match SdClient::new(config.server.clone()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            log::error!("❌ Failed to create client: {}", e);
            return Err(e.into());
        }
    };

    log::info!("📚 Available checkpoints:");
    let models = match client.list_models().await {
        Ok(models) => models,
        Err(e) => {
            log::error!("❌ Could not list models: {}", e);
            log::warn!("💡 Is the server running with --api at {}?", config.server.endpoints.server_url);
            return Err(e.into());
        }
    };
    for model in &models {
        log::info!("  {} ({})", model.model_name, model.title);
    }

    let model = env::var("SD_MODEL")
        .ok()
        .or_else(|| models.first().map(|m| m.model_name.clone()));
    match &model {
        Some(name) => log::info!("🎯 Using checkpoint: {}", name),
        None => log::warn!("⚠️  Server lists no checkpoints, keeping whatever is loaded"),
    }

    log::info!("🎛️  Built-in samplers: {}", Sampler::names().join(", "));

    // Test 1: text-to-image with live progress
    log::info!("🎨 Testing text-to-image generation...");

    let progress_printer = {
        let mut updates = client.progress_stream();
        tokio::spawn(async move {
            while let Some(update) = updates.next().await {
                if let Some(state) = update {
                    log::info!(
                        "📊 {:>3.0}% step {}/{} eta {:.1}s",
                        state.percent(),
                        state.sampling_step,
                        state.sampling_steps,
                        state.eta_relative.as_secs_f32()
                    );
                }
            }
        })
    };

    let request = GenerationRequest::txt2img("mossy cobblestone path, top-down, seamless texture, 4k")
        .with_params(GenerationParams::from_defaults(&config.defaults))
        .with_negative_prompt("text, watermark, blurry")
        .with_sampler(Sampler::DpmPlusPlus2M)
        .with_tiling(true)
        .with_highres(HighresFix::upscale("Latent", 1.5).with_second_pass(10, 0.55));

    let texture = match client.generate_with_progress(model.as_deref(), request).await {
        Ok(response) => {
            log::info!(
                "✅ Generated {} image(s) with seed {}",
                response.images().len(),
                response.seed()
            );
            for bytes in response.images() {
                save(&output_dir, "png", bytes);
            }
            Some(response)
        }
        Err(e) => {
            log::error!("❌ Text-to-image failed: {}", e);
            if e.is_transient() {
                log::warn!("💡 The server may be busy, try again shortly");
            }
            None
        }
    };
    progress_printer.abort();

    // Test 2: normal map from the generated texture
    if let Some(response) = &texture {
        log::info!("🗺️  Testing normal map synthesis...");
        let normal = response
            .decode_first()
            .and_then(|image| {
                NormalMapSynthesizer::default()
                    .with_edge_mode(EdgeMode::Wrap)
                    .synthesize_image(&image)
            })
            .and_then(|normal| encode_png(&normal));
        match normal {
            Ok(png) => {
                save(&output_dir, "normal.png", &png);
            }
            Err(e) => log::error!("❌ Normal map failed: {}", e),
        }
    }

    // Test 3: image-to-image from the first result, same seed
    if let Some(response) = &texture {
        log::info!("🖌️  Testing image-to-image generation...");
        let source = Img2ImgParams::from_png_bytes(response.first_image()).with_denoising_strength(0.45);
        let request = GenerationRequest::img2img("mossy cobblestone path after rain, wet stones", source)
            .with_seed(response.seed())
            .with_size(response.parameters.width, response.parameters.height);

        match client.generate(request).await {
            Ok(variation) => {
                log::info!("✅ Image-to-image done, seed {}", variation.seed());
                save(&output_dir, "img2img.png", variation.first_image());
            }
            Err(e) => log::error!("❌ Image-to-image failed: {}", e),
        }
    }

    // Test 4: the full material flow
    log::info!("🧱 Testing material generation...");
    let settings = MaterialSettings::default().with_tiling(4, 4).with_surface(0.0, 0.3);
    let request = GenerationRequest::txt2img("weathered oak planks, seamless texture")
        .with_params(GenerationParams::from_defaults(&config.defaults))
        .with_tiling(true);

    match client.generate_material(model.as_deref(), request, &settings).await {
        Ok(material) => {
            log::info!(
                "✅ Material ready: {}x{}, seed {}, normal map {}",
                material.albedo.width(),
                material.albedo.height(),
                material.seed,
                if material.normal.is_some() { "✅" } else { "❌" }
            );
            let albedo = save(&output_dir, "albedo.png", &material.albedo_png);
            if let (Some(albedo), Some(normal_png)) = (albedo, &material.normal_png) {
                let normal_path = albedo.with_extension("normal.png");
                match fs::write(&normal_path, normal_png) {
                    Ok(_) => log::info!("💾 Normal map saved to: {}", normal_path.display()),
                    Err(e) => log::error!("❌ Failed to save normal map: {}", e),
                }
            }
        }
        Err(e) => log::error!("❌ Material generation failed: {}", e),
    }

    log::info!("🎉 All tests completed!");
    log::info!("💡 Check the generated files in {}", output_dir.display());
    Ok(())
}

fn save(dir: &Path, suffix: &str, bytes: &[u8]) -> Option<PathBuf> {
    let path = dir.join(format!("{}.{}", Uuid::new_v4(), suffix));
    match fs::write(&path, bytes) {
        Ok(_) => {
            log::info!("💾 Saved to: {}", path.display());
            Some(path)
        }
        Err(e) => {
            log::error!("❌ Failed to save {}: {}", path.display(), e);
            None
        }
    }
}

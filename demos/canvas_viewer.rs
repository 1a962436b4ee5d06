//! Canvas viewer demo.
//!
//! Loads a layer-config document and composites its layers in a window:
//!
//! ```json
//! {
//!   "layers": [
//!     {
//!       "path": "background.png",
//!       "name": "Background",
//!       "vertices": {
//!         "position": [0, 0, 800, 0, 800, 600, 0, 600],
//!         "uv": [0, 0, 1, 0, 1, 1, 0, 1],
//!         "index": [0, 1, 2, 2, 3, 0]
//!       }
//!     }
//!   ],
//!   "canvas": { "width": 800, "height": 600 }
//! }
//! ```
//!
//! Image paths are relative to the document. Without a document, two
//! overlapping generated layers are shown.
//!
//! ```bash
//! cargo run --example canvas_viewer -- path/to/layers.json
//! ```

use std::error::Error;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use canvas_gpu::{
    window, CanvasCompositor, DeviceConfig, FrameOrchestrator, FrameOutcome, GraphicsDevice,
    LayerGpuResource, LayerImage, LayerVertex, ResourceManager,
};

#[derive(Parser, Debug)]
#[command(
    name = "canvas_viewer",
    about = "Composite a layered canvas document in a window"
)]
struct Args {
    /// Layer-config JSON document. Shows generated layers when omitted.
    document: Option<PathBuf>,

    /// Initial window width in pixels.
    #[arg(long, default_value = "800")]
    width: u32,

    /// Initial window height in pixels.
    #[arg(long, default_value = "600")]
    height: u32,

    /// Wait for vertical sync (FIFO) instead of preferring mailbox.
    #[arg(long)]
    vsync: bool,

    /// Enable GPU validation layers.
    #[arg(long)]
    validation: bool,

    /// Exit after rendering N frames (useful for testing).
    #[arg(long)]
    max_frames: Option<u64>,
}

#[derive(Deserialize, Debug)]
struct LayerConfig {
    layers: Vec<LayerEntry>,
    canvas: CanvasSize,
}

#[derive(Deserialize, Debug)]
struct LayerEntry {
    path: PathBuf,
    name: String,
    vertices: VertexArrays,
}

#[derive(Deserialize, Debug)]
struct VertexArrays {
    position: Vec<f32>,
    uv: Vec<f32>,
    index: Vec<u32>,
}

#[derive(Deserialize, Debug)]
struct CanvasSize {
    width: u32,
    height: u32,
}

/// CPU-side layer ready for upload.
struct LayerSource {
    name: String,
    image: LayerImage,
    vertices: Vec<LayerVertex>,
    indices: Vec<u32>,
}

struct Document {
    layers: Vec<LayerSource>,
    canvas: (u32, u32),
}

fn load_document(path: &Path) -> Result<Document, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    let config: LayerConfig = serde_json::from_str(&text)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut layers = Vec::with_capacity(config.layers.len());
    for entry in config.layers {
        let arrays = &entry.vertices;
        if arrays.position.len() % 2 != 0 || arrays.position.len() != arrays.uv.len() {
            log::warn!("Skipping layer '{}': mismatched vertex arrays", entry.name);
            continue;
        }

        let image_path = base_dir.join(&entry.path);
        let rgba = match image::open(&image_path) {
            Ok(image) => image.to_rgba8(),
            Err(e) => {
                log::warn!("Skipping layer '{}': {}: {}", entry.name, image_path.display(), e);
                continue;
            }
        };
        let (width, height) = rgba.dimensions();

        let vertices = arrays
            .position
            .chunks_exact(2)
            .zip(arrays.uv.chunks_exact(2))
            .map(|(p, uv)| LayerVertex::new([p[0], p[1]], [uv[0], uv[1]]))
            .collect();

        layers.push(LayerSource {
            name: entry.name,
            image: LayerImage::rgba8(rgba.into_raw(), width, height),
            vertices,
            indices: entry.vertices.index,
        });
    }

    Ok(Document {
        layers,
        canvas: (config.canvas.width, config.canvas.height),
    })
}

fn checkerboard(size: u32, a: [u8; 4], b: [u8; 4]) -> LayerImage {
    let cell = (size / 8).max(1);
    let pixels = (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size / cell, i / size / cell);
            if (x + y) % 2 == 0 {
                a
            } else {
                b
            }
        })
        .collect();
    LayerImage::rgba8(pixels, size, size)
}

fn generated_document() -> Document {
    let (back_vertices, back_indices) = LayerVertex::quad(100.0, 100.0, 400.0, 300.0);
    let (front_vertices, front_indices) = LayerVertex::quad(300.0, 200.0, 400.0, 300.0);

    Document {
        layers: vec![
            LayerSource {
                name: "checker".to_string(),
                image: checkerboard(256, [220, 60, 60, 255], [250, 250, 250, 255]),
                vertices: back_vertices.to_vec(),
                indices: back_indices.to_vec(),
            },
            LayerSource {
                name: "tint".to_string(),
                image: LayerImage::solid([40, 90, 220, 180], 64, 64),
                vertices: front_vertices.to_vec(),
                indices: front_indices.to_vec(),
            },
        ],
        canvas: (800, 600),
    }
}

struct Viewer {
    resources: ResourceManager,
    frames: FrameOrchestrator,
    compositor: CanvasCompositor,
    device: GraphicsDevice,
    frames_rendered: u64,
    max_frames: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let document = match &args.document {
        Some(path) => load_document(path)?,
        None => generated_document(),
    };
    log::info!(
        "Document: {} layers, canvas {}x{}",
        document.layers.len(),
        document.canvas.0,
        document.canvas.1
    );

    let config = DeviceConfig::default()
        .with_app_name("canvas_viewer")
        .with_extent(args.width, args.height)
        .with_vsync(args.vsync)
        .with_validation(args.validation || cfg!(debug_assertions));

    window::run(
        "Canvas Viewer",
        args.width,
        args.height,
        |window| {
            let device = GraphicsDevice::new(&config, window.window())?;
            let context = device.context();

            let mut compositor = CanvasCompositor::new(context, device.swapchain().format())?;
            let (width, height) = window.dimensions();
            compositor.set_region(0, 0, width, height);
            compositor.set_canvas_size(document.canvas.0, document.canvas.1);

            let mut resources = ResourceManager::new();
            for layer in &document.layers {
                let resource = match LayerGpuResource::create_from_image(
                    context,
                    &layer.image,
                    &layer.vertices,
                    &layer.indices,
                ) {
                    Ok(resource) => resource,
                    Err(e) => {
                        log::warn!("Skipping layer '{}': {}", layer.name, e);
                        continue;
                    }
                };
                compositor.add_layer(resources.add(resource)?);
            }

            let frames = FrameOrchestrator::new(context)?;

            Ok(Viewer {
                resources,
                frames,
                compositor,
                device,
                frames_rendered: 0,
                max_frames: args.max_frames,
            })
        },
        |window, viewer| {
            if let Some((width, height)) = window.take_resize() {
                viewer.device.notify_resized(width, height);
                viewer.compositor.set_region(0, 0, width, height);
            }

            let outcome = viewer.frames.tick(
                &mut viewer.device,
                &mut viewer.compositor,
                &viewer.resources,
                None,
            )?;

            match outcome {
                FrameOutcome::Presented(_) | FrameOutcome::PresentedOutOfDate(_) => {
                    viewer.frames_rendered += 1;
                }
                FrameOutcome::AcquireOutOfDate => log::debug!("Swapchain out of date"),
                FrameOutcome::SurfaceUnavailable => {
                    std::thread::sleep(std::time::Duration::from_millis(16));
                }
            }

            if viewer
                .max_frames
                .is_some_and(|max| viewer.frames_rendered >= max)
            {
                log::info!("Rendered {} frames, exiting", viewer.frames_rendered);
                window.request_close();
            }
            Ok(())
        },
    )?;

    Ok(())
}

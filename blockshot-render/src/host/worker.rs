//! Host backed by a dedicated OS thread.
//!
//! The thread owns all render state; the async side only holds a command
//! sender. Shutting the thread down drops every surface and the renderer
//! with it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use async_trait::async_trait;
use glam::Mat4;
use image::RgbaImage;
use tokio::sync::{mpsc, oneshot};

use blockshot_nbt::VoxelModel;

use super::{
    CORE_GLOBALS, DrawPass, Host, HostError, HostFactory, RESOURCES_GLOBAL, SurfaceId,
    VIEWER_GLOBAL,
};
use crate::engine::atlas::TextureAtlas;
use crate::engine::surface::{Surface, SurfaceSpec};
use crate::engine::{RendererOptions, StructureRenderer};

type Reply<T> = oneshot::Sender<Result<T, HostError>>;

enum Command {
    HasGlobal(String, Reply<bool>),
    LoadModule(String, Reply<()>),
    LoadAtlas(String, Reply<()>),
    SetModel(Arc<VoxelModel>, RendererOptions, Reply<()>),
    CreateSurface(SurfaceSpec, Reply<SurfaceId>),
    Draw(SurfaceId, DrawPass, Mat4, Reply<()>),
    ReadPixels(SurfaceId, Reply<RgbaImage>),
    ReleaseSurface(SurfaceId, Reply<()>),
    SurfaceCount(Reply<usize>),
    Reset(Reply<()>),
    Shutdown,
}

#[derive(Default)]
struct Context {
    globals: HashSet<&'static str>,
    atlas: Option<TextureAtlas>,
    renderer: Option<StructureRenderer>,
    surfaces: HashMap<SurfaceId, Surface>,
    next_surface: u64,
}

impl Context {
    fn require(&self, global: &'static str) -> Result<(), HostError> {
        if self.globals.contains(global) {
            Ok(())
        } else {
            Err(HostError::MissingGlobal(global))
        }
    }

    fn load_module(&mut self, name: &str) -> Result<(), HostError> {
        match name {
            VIEWER_GLOBAL => {
                self.require("engine")?;
                self.globals.insert(VIEWER_GLOBAL);
                Ok(())
            }
            other => Err(HostError::UnknownModule(other.to_string())),
        }
    }

    fn load_atlas(&mut self, data_url: &str) -> Result<(), HostError> {
        let atlas = TextureAtlas::from_data_url(data_url)?;
        let (width, height) = atlas.dimensions();
        log::debug!("Atlas installed: {}x{} ({} tiles)", width, height, atlas.tile_count());
        self.atlas = Some(atlas);
        // A new atlas invalidates cached colours.
        self.renderer = None;
        self.globals.insert(RESOURCES_GLOBAL);
        Ok(())
    }

    fn set_model(&mut self, model: Arc<VoxelModel>, options: RendererOptions) -> Result<(), HostError> {
        self.require(VIEWER_GLOBAL)?;
        self.require(RESOURCES_GLOBAL)?;
        let atlas = self.atlas.as_ref().ok_or(HostError::MissingGlobal(RESOURCES_GLOBAL))?;

        let cached = self
            .renderer
            .as_ref()
            .is_some_and(|r| Arc::ptr_eq(r.model(), &model) && *r.options() == options);
        if !cached {
            self.renderer = Some(StructureRenderer::new(model, atlas, options));
        }
        Ok(())
    }

    fn create_surface(&mut self, spec: SurfaceSpec) -> Result<SurfaceId, HostError> {
        if !spec.is_valid() {
            return Err(HostError::InvalidSurface {
                width: spec.width,
                height: spec.height,
            });
        }
        self.next_surface += 1;
        let id = SurfaceId(self.next_surface);
        self.surfaces.insert(id, Surface::new(spec));
        Ok(id)
    }

    fn draw(&mut self, id: SurfaceId, pass: DrawPass, view: Mat4) -> Result<(), HostError> {
        let renderer = self.renderer.as_ref().ok_or(HostError::NoModel)?;
        let surface = self.surfaces.get_mut(&id).ok_or(HostError::UnknownSurface(id))?;
        match pass {
            DrawPass::Structure => renderer.draw_structure(surface, view),
            DrawPass::Grid => renderer.draw_grid(surface, view),
        }
        Ok(())
    }

    fn read_pixels(&self, id: SurfaceId) -> Result<RgbaImage, HostError> {
        self.surfaces
            .get(&id)
            .map(Surface::capture)
            .ok_or(HostError::UnknownSurface(id))
    }

    fn release_surface(&mut self, id: SurfaceId) -> Result<(), HostError> {
        self.surfaces
            .remove(&id)
            .map(|_| ())
            .ok_or(HostError::UnknownSurface(id))
    }

    fn reset(&mut self) {
        self.renderer = None;
        self.surfaces.clear();
    }
}

fn run(mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut ctx = Context::default();
    ctx.globals.extend(CORE_GLOBALS);

    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::HasGlobal(name, reply) => {
                let _ = reply.send(Ok(ctx.globals.contains(name.as_str())));
            }
            Command::LoadModule(name, reply) => {
                let _ = reply.send(ctx.load_module(&name));
            }
            Command::LoadAtlas(url, reply) => {
                let _ = reply.send(ctx.load_atlas(&url));
            }
            Command::SetModel(model, options, reply) => {
                let _ = reply.send(ctx.set_model(model, options));
            }
            Command::CreateSurface(spec, reply) => {
                let _ = reply.send(ctx.create_surface(spec));
            }
            Command::Draw(id, pass, view, reply) => {
                let _ = reply.send(ctx.draw(id, pass, view));
            }
            Command::ReadPixels(id, reply) => {
                let _ = reply.send(ctx.read_pixels(id));
            }
            Command::ReleaseSurface(id, reply) => {
                let _ = reply.send(ctx.release_surface(id));
            }
            Command::SurfaceCount(reply) => {
                let _ = reply.send(Ok(ctx.surfaces.len()));
            }
            Command::Reset(reply) => {
                ctx.reset();
                let _ = reply.send(Ok(()));
            }
            Command::Shutdown => break,
        }
    }

    if !ctx.surfaces.is_empty() {
        log::warn!("Render context closed with {} live surfaces", ctx.surfaces.len());
    }
}

pub struct WorkerHost {
    name: String,
    sender: Option<mpsc::UnboundedSender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHost {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sender: None,
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender.is_some()
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, HostError> {
        let sender = self.sender.as_ref().ok_or(HostError::NotRunning)?;
        let (tx, rx) = oneshot::channel();
        sender.send(command(tx)).map_err(|_| HostError::Disconnected)?;
        rx.await.map_err(|_| HostError::Disconnected)?
    }
}

#[async_trait]
impl Host for WorkerHost {
    async fn launch(&mut self) -> Result<(), HostError> {
        if self.is_running() {
            return Ok(());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(rx))
            .map_err(|e| HostError::Launch(e.to_string()))?;
        self.sender = Some(tx);
        self.thread = Some(thread);
        log::debug!("Render context {} launched", self.name);
        Ok(())
    }

    async fn has_global(&mut self, name: &str) -> Result<bool, HostError> {
        let name = name.to_string();
        self.request(|reply| Command::HasGlobal(name, reply)).await
    }

    async fn load_module(&mut self, name: &str) -> Result<(), HostError> {
        let name = name.to_string();
        self.request(|reply| Command::LoadModule(name, reply)).await
    }

    async fn load_atlas(&mut self, data_url: String) -> Result<(), HostError> {
        self.request(|reply| Command::LoadAtlas(data_url, reply)).await
    }

    async fn set_model(&mut self, model: Arc<VoxelModel>, options: RendererOptions) -> Result<(), HostError> {
        self.request(|reply| Command::SetModel(model, options, reply)).await
    }

    async fn create_surface(&mut self, spec: SurfaceSpec) -> Result<SurfaceId, HostError> {
        self.request(|reply| Command::CreateSurface(spec, reply)).await
    }

    async fn draw(&mut self, surface: SurfaceId, pass: DrawPass, view: Mat4) -> Result<(), HostError> {
        self.request(|reply| Command::Draw(surface, pass, view, reply)).await
    }

    async fn read_pixels(&mut self, surface: SurfaceId) -> Result<RgbaImage, HostError> {
        self.request(|reply| Command::ReadPixels(surface, reply)).await
    }

    async fn release_surface(&mut self, surface: SurfaceId) -> Result<(), HostError> {
        self.request(|reply| Command::ReleaseSurface(surface, reply)).await
    }

    async fn surface_count(&mut self) -> Result<usize, HostError> {
        self.request(Command::SurfaceCount).await
    }

    async fn reset(&mut self) -> Result<(), HostError> {
        self.request(Command::Reset).await
    }

    async fn close(&mut self) -> Result<(), HostError> {
        let Some(sender) = self.sender.take() else {
            return Ok(());
        };
        let _ = sender.send(Command::Shutdown);
        drop(sender);

        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|_| HostError::Disconnected)?
                .map_err(|_| HostError::Disconnected)?;
        }
        log::debug!("Render context {} closed", self.name);
        Ok(())
    }
}

impl Drop for WorkerHost {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Command::Shutdown);
        }
    }
}

/// Creates one [`WorkerHost`] per environment, numbered for thread names.
#[derive(Debug, Default)]
pub struct WorkerHostFactory {
    created: AtomicU64,
}

impl WorkerHostFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

impl HostFactory for WorkerHostFactory {
    fn create(&self) -> Box<dyn Host> {
        let n = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        Box::new(WorkerHost::new(format!("blockshot-host-{n}")))
    }
}

//! Push and pull orchestration.

use std::fs;

use tempfile::TempDir;

use crate::normalize::{IMAGES_DIR, REPOSITORIES};
use crate::{
    Config, Docker, Engine, LayerId, LayerStore, RefEntry, Reference, Repositories, Result,
    Transport, normalize, perms, walk,
};

/// Result of a successful push.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PushResult {
    /// The pushed reference.
    pub reference: Reference,
    /// Tip the reference now points to, if the export tagged it.
    pub tip: Option<LayerId>,
    /// Layers copied into the repository (absent before this push).
    pub uploaded: Vec<LayerId>,
    /// Layers the repository already held.
    pub skipped: Vec<LayerId>,
    /// Refs published to the repository index.
    pub refs: Vec<RefEntry>,
}

/// Result of a successful pull.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PullResult {
    /// The pulled reference.
    pub reference: Reference,
    /// Tip layer the reference resolved to.
    pub tip: LayerId,
    /// Layers fetched from the repository, tip first.
    pub fetched: Vec<LayerId>,
}

/// Moves images between a local engine and a shared repository.
pub struct Depot<E = Docker> {
    config: Config,
    engine: E,
    transport: Box<dyn Transport>,
}

impl<E: std::fmt::Debug> std::fmt::Debug for Depot<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Depot")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("transport", &self.transport.describe())
            .finish()
    }
}

impl Depot<Docker> {
    /// Opens a depot that drives the configured engine command.
    pub fn open(config: Config) -> Result<Self> {
        let engine = Docker::new(&config.engine_command)?;
        Ok(Self::with_engine(config, engine))
    }
}

impl<E: Engine> Depot<E> {
    /// Creates a depot around an explicit engine, using the configured transport.
    pub fn with_engine(config: Config, engine: E) -> Self {
        let transport = config.transport.build();
        Self {
            config,
            engine,
            transport,
        }
    }

    /// Replaces the transport.
    #[must_use]
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Box::new(transport);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Exports `image` from the engine and publishes it to the repository.
    ///
    /// Layers the repository already holds are left untouched. Layers are
    /// published before refs, so a ref never names a lineage still in flight.
    pub fn push(&self, image: &str, on_status: impl Fn(&str)) -> Result<PushResult> {
        let reference = Reference::parse(image)?;
        let work = self.work_area("push")?;

        on_status(&format!("Exporting {reference}..."));
        self.engine.export(&reference, work.path())?;
        let normalized = normalize(work.path())?;

        let staged = LayerStore::new(work.path().join(IMAGES_DIR));
        let repo = self.config.store();
        let mut uploaded = Vec::new();
        let mut skipped = Vec::new();
        for id in staged.ids()? {
            if repo.contains(&id) {
                skipped.push(id);
                continue;
            }
            on_status(&format!("Pushing layer {}...", id.short()));
            repo.clear_staging(&id)?;
            self.transport
                .sync(&staged.payload_path(&id), &repo.staging_path(&id))?;
            repo.commit_staging(&id)?;
            uploaded.push(id);
        }

        let index = self.config.index();
        on_status(&format!("Publishing {} ref(s)...", normalized.refs.len()));
        self.transport
            .sync(&work.path().join(REPOSITORIES), index.root())?;
        perms::harden(index.root())?;

        let tip = normalized
            .refs
            .iter()
            .find(|r| r.name == reference.name && r.tag == reference.tag)
            .map(|r| r.id.clone());
        if tip.is_none() {
            tracing::warn!(%reference, "export did not tag the pushed reference");
        }
        tracing::info!(
            %reference,
            uploaded = uploaded.len(),
            skipped = skipped.len(),
            transport = %self.transport.describe(),
            "push complete"
        );
        Ok(PushResult {
            reference,
            tip,
            uploaded,
            skipped,
            refs: normalized.refs,
        })
    }

    /// Fetches the layers of `image` the engine lacks and loads the image.
    pub fn pull(&mut self, image: &str, on_status: impl Fn(&str)) -> Result<PullResult> {
        let reference = Reference::parse(image)?;
        let tip = self.config.index().resolve(&reference)?;
        on_status(&format!("Resolved {reference} to {}", tip.short()));

        let work = self.work_area("pull")?;
        let repo = self.config.store();
        let mut fetched = Vec::new();
        {
            let engine = &self.engine;
            for layer in walk(&repo, tip.clone(), |id| engine.has_layer(id)) {
                let layer = layer?;
                on_status(&format!("Pulling layer {}...", layer.id.short()));
                self.transport.sync(
                    &repo.payload_path(&layer.id),
                    &work.path().join(layer.id.as_str()),
                )?;
                fetched.push(layer.id);
            }
        }

        Repositories::single(&reference, &tip).save(&work.path().join(REPOSITORIES))?;
        perms::harden(work.path())?;

        on_status(&format!("Loading {reference}..."));
        self.engine.import(work.path())?;

        tracing::info!(%reference, %tip, fetched = fetched.len(), "pull complete");
        Ok(PullResult {
            reference,
            tip,
            fetched,
        })
    }

    /// Creates a fresh, empty, owner-only work area; removed on drop.
    fn work_area(&self, label: &str) -> Result<TempDir> {
        let root = &self.config.work_root;
        fs::create_dir_all(root)?;
        let work = tempfile::Builder::new()
            .prefix(&format!("{label}-"))
            .tempdir_in(root)?;
        tracing::debug!(path = %work.path().display(), "created work area");
        Ok(work)
    }
}

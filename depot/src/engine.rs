//! Container engine capabilities: export, import, and layer presence.
//!
//! [`Docker`] drives the engine CLI as a subprocess, streaming archives
//! through the `tar` crate. [`MemoryEngine`] keeps layers in memory and
//! speaks the same on-disk archive format, for tests and dry runs.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::normalize::REPOSITORIES;
use crate::store::METADATA_FILE;
use crate::{Error, LayerId, LayerMeta, LayerStore, Reference, Repositories, Result};

/// Payload file inside an exported layer directory.
const LAYER_TAR: &str = "layer.tar";
/// Archive format version marker written for each layer.
const VERSION_FILE: &str = "VERSION";

/// The three engine operations a transfer needs.
pub trait Engine {
    /// Exports `reference` as a flat archive unpacked into `dest`.
    fn export(&self, reference: &Reference, dest: &Path) -> Result<()>;

    /// Loads the flat archive in `source` as a local image.
    fn import(&mut self, source: &Path) -> Result<()>;

    /// Returns `true` if the engine already holds layer `id`.
    fn has_layer(&self, id: &LayerId) -> Result<bool>;
}

/// Docker (or a compatible CLI) driven as a subprocess.
#[derive(Debug, Clone)]
pub struct Docker {
    program: String,
    args: Vec<String>,
}

impl Docker {
    /// Creates an engine from a command prefix such as `["sudo", "docker"]`.
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("empty engine command".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn command(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(subcommand);
        cmd
    }
}

fn engine_err(op: &'static str) -> impl Fn(std::io::Error) -> Error {
    move |e| Error::Engine {
        op,
        message: e.to_string(),
    }
}

fn stderr_text(op: &'static str, stderr: &[u8]) -> Error {
    Error::Engine {
        op,
        message: String::from_utf8_lossy(stderr).trim().to_owned(),
    }
}

impl Engine for Docker {
    fn export(&self, reference: &Reference, dest: &Path) -> Result<()> {
        tracing::info!(%reference, dest = %dest.display(), "docker save");
        let mut child = self
            .command("save")
            .arg(reference.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(engine_err("save"))?;

        let unpacked = match child.stdout.take() {
            Some(stdout) => tar::Archive::new(stdout).unpack(dest),
            None => Ok(()),
        };
        let output = child.wait_with_output().map_err(engine_err("save"))?;
        if !output.status.success() {
            return Err(stderr_text("save", &output.stderr));
        }
        unpacked.map_err(engine_err("save"))
    }

    fn import(&mut self, source: &Path) -> Result<()> {
        tracing::info!(source = %source.display(), "docker load");
        let mut child = self
            .command("load")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(engine_err("load"))?;

        let streamed = match child.stdin.take() {
            Some(stdin) => {
                let mut builder = tar::Builder::new(stdin);
                builder.follow_symlinks(false);
                builder
                    .append_dir_all(".", source)
                    .and_then(|()| builder.into_inner().map(drop))
            }
            None => Ok(()),
        };
        let output = child.wait_with_output().map_err(engine_err("load"))?;
        if !output.status.success() {
            return Err(stderr_text("load", &output.stderr));
        }
        streamed.map_err(engine_err("load"))
    }

    fn has_layer(&self, id: &LayerId) -> Result<bool> {
        let output = self
            .command("inspect")
            .args(["--type", "image", "--format", "{{.Id}}"])
            .arg(id.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(engine_err("inspect"))?;
        if output.status.success() {
            return Ok(true);
        }
        // Anything but a plain "no such image" means the engine could not answer.
        if String::from_utf8_lossy(&output.stderr).contains("No such") {
            return Ok(false);
        }
        Err(stderr_text("inspect", &output.stderr))
    }
}

#[derive(Debug, Clone)]
struct MemoryLayer {
    meta: LayerMeta,
    payload: Vec<u8>,
}

/// In-memory engine that exports and imports the flat archive format.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    layers: BTreeMap<LayerId, MemoryLayer>,
    tags: BTreeMap<Reference, LayerId>,
    imports: usize,
}

impl MemoryEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a layer with the given payload bytes.
    pub fn add_layer(&mut self, meta: LayerMeta, payload: impl Into<Vec<u8>>) {
        let payload = payload.into();
        self.layers.insert(meta.id.clone(), MemoryLayer { meta, payload });
    }

    /// Points `reference` at `id`.
    pub fn tag(&mut self, reference: Reference, id: LayerId) {
        self.tags.insert(reference, id);
    }

    /// Returns the tip `reference` points to.
    pub fn resolve(&self, reference: &Reference) -> Option<&LayerId> {
        self.tags.get(reference)
    }

    /// Returns the payload bytes of a held layer.
    pub fn payload(&self, id: &LayerId) -> Option<&[u8]> {
        self.layers.get(id).map(|l| l.payload.as_slice())
    }

    /// Returns the ids of every held layer.
    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.keys().cloned().collect()
    }

    /// Returns how many archives have been imported.
    pub fn imports(&self) -> usize {
        self.imports
    }

    /// Returns the chain from `tip` to its root, tip first.
    ///
    /// Fails if a link is missing or the chain loops.
    pub fn lineage(&self, tip: &LayerId) -> Result<Vec<LayerId>> {
        let mut chain = Vec::new();
        let mut next = Some(tip.clone());
        while let Some(id) = next {
            if chain.contains(&id) {
                return Err(Error::CyclicLineage(id));
            }
            let layer = self.layers.get(&id).ok_or_else(|| Error::Engine {
                op: "lineage",
                message: format!("missing layer {id}"),
            })?;
            next = layer.meta.parent.clone();
            chain.push(id);
        }
        Ok(chain)
    }
}

impl Engine for MemoryEngine {
    fn export(&self, reference: &Reference, dest: &Path) -> Result<()> {
        let tip = self.resolve(reference).ok_or_else(|| Error::Engine {
            op: "save",
            message: format!("no such image: {reference}"),
        })?;
        for id in self.lineage(tip)? {
            let layer = &self.layers[&id];
            let dir = dest.join(id.as_str());
            fs::create_dir_all(&dir)?;
            fs::write(dir.join(METADATA_FILE), serde_json::to_vec(&layer.meta)?)?;
            fs::write(dir.join(LAYER_TAR), &layer.payload)?;
            fs::write(dir.join(VERSION_FILE), "1.0")?;
        }
        Repositories::single(reference, tip).save(&dest.join(REPOSITORIES))
    }

    fn import(&mut self, source: &Path) -> Result<()> {
        let archive = LayerStore::new(source);
        for id in archive.ids()? {
            let Some(meta) = archive.metadata(&id)? else {
                continue;
            };
            let mut payload = Vec::new();
            if let Ok(mut file) = fs::File::open(archive.payload_path(&id).join(LAYER_TAR)) {
                file.read_to_end(&mut payload)?;
            }
            self.add_layer(meta, payload);
        }

        let document = Repositories::load(&source.join(REPOSITORIES))?;
        for (name, tags) in document.0 {
            for (tag, raw_id) in tags {
                let reference = Reference::new(&name, &tag)?;
                let id = LayerId::parse(&raw_id)?;
                // Loading fails unless the whole chain is now present.
                self.lineage(&id).map_err(|e| Error::Engine {
                    op: "load",
                    message: e.to_string(),
                })?;
                self.tag(reference, id);
            }
        }
        self.imports += 1;
        Ok(())
    }

    fn has_layer(&self, id: &LayerId) -> Result<bool> {
        Ok(self.layers.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(c: char) -> LayerId {
        LayerId::parse(&c.to_string().repeat(40)).unwrap()
    }

    fn engine_with_chain() -> MemoryEngine {
        let mut engine = MemoryEngine::new();
        engine.add_layer(LayerMeta::new(id('b'), None), "base");
        engine.add_layer(LayerMeta::new(id('a'), Some(id('b'))), "top");
        engine.tag(Reference::parse("alpine:3.18").unwrap(), id('a'));
        engine
    }

    #[test]
    fn docker_requires_a_program() {
        assert!(matches!(Docker::new(&[]), Err(Error::Config(_))));
        let docker = Docker::new(&["sudo".into(), "docker".into()]).unwrap();
        assert_eq!(docker.program, "sudo");
        assert_eq!(docker.args, vec!["docker".to_owned()]);
    }

    /// A `sh -c` stand-in for the engine CLI that runs `script`.
    #[cfg(unix)]
    fn scripted(script: &str) -> Docker {
        Docker::new(&["sh".into(), "-c".into(), script.into(), "sh".into()]).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn inspect_distinguishes_absent_from_failure() {
        assert!(scripted("exit 0").has_layer(&id('a')).unwrap());
        assert!(
            !scripted("echo 'Error: No such image: x' >&2; exit 1")
                .has_layer(&id('a'))
                .unwrap()
        );
        let err = scripted("echo 'Cannot connect to the Docker daemon' >&2; exit 1")
            .has_layer(&id('a'))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Engine { op: "inspect", ref message } if message.contains("daemon")
        ));
    }

    #[cfg(unix)]
    #[test]
    fn inspect_queries_images_only() {
        let docker = scripted(r#"[ "$1 $2 $3" = "inspect --type image" ] || exit 3"#);
        assert!(docker.has_layer(&id('a')).unwrap());
    }

    #[test]
    fn lineage_walks_to_root() {
        let engine = engine_with_chain();
        assert_eq!(engine.lineage(&id('a')).unwrap(), vec![id('a'), id('b')]);
    }

    #[test]
    fn export_writes_flat_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine_with_chain();
        engine
            .export(&Reference::parse("alpine:3.18").unwrap(), tmp.path())
            .unwrap();

        assert!(tmp.path().join(id('a').as_str()).join("json").is_file());
        assert_eq!(
            fs::read(tmp.path().join(id('b').as_str()).join(LAYER_TAR)).unwrap(),
            b"base"
        );
        let doc = Repositories::load(&tmp.path().join(REPOSITORIES)).unwrap();
        assert_eq!(doc.0["alpine"]["3.18"], id('a').as_str());
    }

    #[test]
    fn export_unknown_image_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = MemoryEngine::new()
            .export(&Reference::parse("ghost").unwrap(), tmp.path())
            .unwrap_err();
        assert!(matches!(err, Error::Engine { op: "save", .. }));
    }

    #[test]
    fn import_requires_complete_chain() {
        let tmp = tempfile::tempdir().unwrap();
        engine_with_chain()
            .export(&Reference::parse("alpine:3.18").unwrap(), tmp.path())
            .unwrap();
        fs::remove_dir_all(tmp.path().join(id('b').as_str())).unwrap();

        let mut target = MemoryEngine::new();
        assert!(matches!(
            target.import(tmp.path()),
            Err(Error::Engine { op: "load", .. })
        ));

        target.add_layer(LayerMeta::new(id('b'), None), "base");
        target.import(tmp.path()).unwrap();
        assert_eq!(
            target.resolve(&Reference::parse("alpine:3.18").unwrap()),
            Some(&id('a'))
        );
    }
}

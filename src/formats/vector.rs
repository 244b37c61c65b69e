//! Vector-bundle decoding: a `data.json` scene manifest plus an `images/`
//! directory of named bitmap assets (the atlas). A standalone manifest with
//! no external image references is the "single file" flavor and carries an
//! empty atlas.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context as _;

use crate::foundation::{
    core::{Bitmap, VideoSize},
    error::{KinoError, KinoResult},
};

pub const MANIFEST_FILE: &str = "data.json";
pub const ASSET_DIR: &str = "images";

/// Raw manifest as serialized. Field names follow the established vector
/// animation JSON convention (`w`/`h` canvas, `fr` frame rate, `ip`/`op`
/// in/out points in frames).
#[derive(Debug, serde::Deserialize)]
struct RawManifest {
    w: f64,
    h: f64,
    fr: f64,
    ip: f64,
    op: f64,
    #[serde(default)]
    nm: Option<String>,
    #[serde(default)]
    assets: Vec<RawAsset>,
}

#[derive(Debug, serde::Deserialize)]
struct RawAsset {
    #[serde(default)]
    id: Option<String>,
    /// Relative directory of the asset, e.g. `images/`.
    #[serde(default)]
    u: Option<String>,
    /// File name of the asset.
    #[serde(default)]
    p: Option<String>,
}

/// Validated scene header extracted from the manifest.
#[derive(Clone, Debug)]
pub struct VectorScene {
    pub name: Option<String>,
    pub size: VideoSize,
    pub fps: f64,
    pub in_point: f64,
    pub out_point: f64,
}

impl VectorScene {
    pub fn frame_count(&self) -> u64 {
        (self.out_point - self.in_point).max(0.0).round() as u64
    }

    pub fn duration_secs(&self) -> f64 {
        if self.fps <= 0.0 {
            return 0.0;
        }
        (self.out_point - self.in_point).max(0.0) / self.fps
    }
}

/// Lookup from named image-asset ids to decoded bitmaps.
#[derive(Debug, Default)]
pub struct ImageAtlas {
    images: HashMap<String, Bitmap>,
}

impl ImageAtlas {
    pub fn get(&self, id: &str) -> Option<&Bitmap> {
        self.images.get(id)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Any bitmap, for poster-style previews. Deterministic: smallest id.
    pub fn first(&self) -> Option<&Bitmap> {
        let id = self.images.keys().min()?;
        self.images.get(id)
    }
}

/// A decoded vector animation: scene header, atlas, and the directory the
/// atlas was anchored at (empty path for the single-file flavor).
#[derive(Debug)]
pub struct VectorBundle {
    pub scene: VectorScene,
    pub atlas: ImageAtlas,
    pub root: PathBuf,
}

/// Parse and validate manifest bytes. All serde/shape failures surface as
/// `KinoError::Decode`; the resolver relies on that to keep "valid JSON, not
/// a manifest" from falling through to other formats.
pub fn decode_manifest(bytes: &[u8]) -> KinoResult<VectorScene> {
    let raw: RawManifest = serde_json::from_slice(bytes)
        .map_err(|e| KinoError::decode(format!("vector manifest: {e}")))?;

    if raw.fr <= 0.0 || !raw.fr.is_finite() {
        return Err(KinoError::decode("vector manifest: frame rate must be > 0"));
    }
    if raw.op <= raw.ip {
        return Err(KinoError::decode(
            "vector manifest: out point must be after in point",
        ));
    }
    if raw.w < 1.0 || raw.h < 1.0 {
        return Err(KinoError::decode("vector manifest: degenerate canvas"));
    }

    Ok(VectorScene {
        name: raw.nm,
        size: VideoSize::new(raw.w.round() as u32, raw.h.round() as u32),
        fps: raw.fr,
        in_point: raw.ip,
        out_point: raw.op,
    })
}

/// Decode a standalone manifest (no external image references).
pub fn load_single_file(bytes: &[u8]) -> KinoResult<VectorBundle> {
    let scene = decode_manifest(bytes)?;
    Ok(VectorBundle {
        scene,
        atlas: ImageAtlas::default(),
        root: PathBuf::new(),
    })
}

/// Decode a bundle directory: `data.json` + `images/`, both required.
pub fn load_bundle(dir: &Path) -> KinoResult<VectorBundle> {
    let manifest_path = dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(KinoError::MissingManifest);
    }
    let asset_dir = dir.join(ASSET_DIR);
    if !asset_dir.is_dir() {
        return Err(KinoError::MissingAssetDirectory);
    }

    let manifest_bytes = std::fs::read(&manifest_path)
        .with_context(|| format!("read manifest '{}'", manifest_path.display()))
        .map_err(KinoError::from)?;
    let scene = decode_manifest(&manifest_bytes)?;
    let atlas = load_atlas(&asset_dir, &manifest_bytes)?;

    Ok(VectorBundle {
        scene,
        atlas,
        root: dir.to_path_buf(),
    })
}

/// Load every decodable image in the asset directory, keyed by manifest asset
/// id where one references the file, and by file stem otherwise.
fn load_atlas(asset_dir: &Path, manifest_bytes: &[u8]) -> KinoResult<ImageAtlas> {
    let mut ids_by_file: HashMap<String, String> = HashMap::new();
    if let Ok(raw) = serde_json::from_slice::<RawManifest>(manifest_bytes) {
        for asset in raw.assets {
            if let (Some(id), Some(p)) = (asset.id, asset.p) {
                let _ = asset.u;
                ids_by_file.insert(p, id);
            }
        }
    }

    let mut images = HashMap::new();
    let entries = std::fs::read_dir(asset_dir)
        .with_context(|| format!("read asset directory '{}'", asset_dir.display()))
        .map_err(KinoError::from)?;
    for entry in entries {
        let entry = entry.map_err(KinoError::from)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
            continue;
        };
        if file_name.starts_with('.') {
            continue;
        }

        let bytes = std::fs::read(&path)
            .with_context(|| format!("read atlas image '{}'", path.display()))
            .map_err(KinoError::from)?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(|e| KinoError::decode(format!("atlas image '{file_name}': {e}")))?;
        let rgba = decoded.to_rgba8();
        let (w, h) = rgba.dimensions();
        let bitmap = Bitmap::new(w, h, rgba.into_raw())?;

        let key = ids_by_file.get(&file_name).cloned().unwrap_or_else(|| {
            Path::new(&file_name)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(&file_name)
                .to_string()
        });
        images.insert(key, bitmap);
    }

    Ok(ImageAtlas { images })
}

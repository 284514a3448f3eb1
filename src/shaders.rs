//! Compositing shader set.
//!
//! The passes depend on a fixed family of shaders shipped alongside the
//! integration. Loading is all-or-nothing: a bundle with any shader missing
//! is rejected, and lookups then fall back to the host's global shader
//! registry so a partially broken install degrades loudly instead of
//! rendering garbage.

use std::collections::HashMap;

use tracing::error;

use crate::engine::ShaderHandle;

/// Identifies one shader in the compositing family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    ClipPlaneSimple,
    ClipPlaneSimpleDebug,
    ClipPlaneComplex,
    ClipPlaneComplexDebug,
    WriteOpaqueToAlpha,
    CombineAlpha,
    Write,
    ForceForwardRendering,
}

impl ShaderKind {
    pub const ALL: [ShaderKind; 8] = [
        ShaderKind::ClipPlaneSimple,
        ShaderKind::ClipPlaneSimpleDebug,
        ShaderKind::ClipPlaneComplex,
        ShaderKind::ClipPlaneComplexDebug,
        ShaderKind::WriteOpaqueToAlpha,
        ShaderKind::CombineAlpha,
        ShaderKind::Write,
        ShaderKind::ForceForwardRendering,
    ];

    /// Asset name inside the shipped bundle.
    pub fn asset_name(self) -> &'static str {
        match self {
            ShaderKind::ClipPlaneSimple => "ClipPlaneSimple",
            ShaderKind::ClipPlaneSimpleDebug => "ClipPlaneSimpleDebug",
            ShaderKind::ClipPlaneComplex => "ClipPlaneComplex",
            ShaderKind::ClipPlaneComplexDebug => "ClipPlaneComplexDebug",
            ShaderKind::WriteOpaqueToAlpha => "WriteOpaqueToAlpha",
            ShaderKind::CombineAlpha => "CombineAlpha",
            ShaderKind::Write => "Write",
            ShaderKind::ForceForwardRendering => "ForceForwardRendering",
        }
    }

    /// Path used for the global-registry fallback lookup.
    pub fn registry_path(self) -> String {
        format!("Hidden/Stagelink/{}", self.asset_name())
    }
}

/// Where shader objects come from. Implemented over the host engine's asset
/// system.
pub trait ShaderSource {
    /// Loads a shader from the shipped bundle by asset name.
    fn load(&mut self, name: &str) -> Option<ShaderHandle>;

    /// Looks a shader up in the host's global registry by path.
    fn find_global(&self, path: &str) -> Option<ShaderHandle>;
}

/// Cache over a [`ShaderSource`], loaded once per activation.
#[derive(Debug, Default)]
pub struct ShaderCatalog {
    cache: HashMap<ShaderKind, ShaderHandle>,
    valid: bool,
}

impl ShaderCatalog {
    /// Loads every shader in the family. If any is missing the whole cache
    /// is discarded and lookups fall through to the global registry.
    pub fn load(source: &mut dyn ShaderSource) -> Self {
        let mut cache = HashMap::with_capacity(ShaderKind::ALL.len());
        let mut missing = Vec::new();
        for kind in ShaderKind::ALL {
            match source.load(kind.asset_name()) {
                Some(handle) => {
                    cache.insert(kind, handle);
                }
                None => missing.push(kind.asset_name()),
            }
        }
        if missing.is_empty() {
            ShaderCatalog { cache, valid: true }
        } else {
            error!(missing = ?missing, "shader bundle incomplete, falling back to global registry");
            ShaderCatalog { cache: HashMap::new(), valid: false }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Resolves one shader, via the cache when the bundle loaded cleanly and
    /// via the global registry otherwise.
    pub fn get(&self, kind: ShaderKind, source: &dyn ShaderSource) -> Option<ShaderHandle> {
        if self.valid {
            self.cache.get(&kind).copied()
        } else {
            source.find_global(&kind.registry_path())
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    struct MapSource {
        bundle: HashMap<&'static str, ShaderHandle>,
        global: HashMap<String, ShaderHandle>,
    }

    impl ShaderSource for MapSource {
        fn load(&mut self, name: &str) -> Option<ShaderHandle> {
            self.bundle.get(name).copied()
        }

        fn find_global(&self, path: &str) -> Option<ShaderHandle> {
            self.global.get(path).copied()
        }
    }

    fn full_bundle() -> MapSource {
        let bundle = ShaderKind::ALL
            .iter()
            .enumerate()
            .map(|(i, kind)| (kind.asset_name(), ShaderHandle(i as u64 + 1)))
            .collect();
        MapSource { bundle, global: HashMap::new() }
    }

    #[test]
    fn complete_bundle_serves_from_cache() {
        let mut source = full_bundle();
        let catalog = ShaderCatalog::load(&mut source);
        assert!(catalog.is_valid());
        assert_eq!(catalog.get(ShaderKind::Write, &source), Some(ShaderHandle(7)));
    }

    #[test]
    fn missing_shader_invalidates_whole_catalog() {
        let mut source = full_bundle();
        source.bundle.remove("CombineAlpha");
        let catalog = ShaderCatalog::load(&mut source);
        assert!(!catalog.is_valid());
        // Even shaders that loaded are no longer served from the cache.
        assert_eq!(catalog.get(ShaderKind::Write, &source), None);
    }

    #[test]
    fn invalid_catalog_falls_back_to_global_registry() {
        let mut source = full_bundle();
        source.bundle.clear();
        source
            .global
            .insert("Hidden/Stagelink/Write".to_string(), ShaderHandle(99));
        let catalog = ShaderCatalog::load(&mut source);
        assert_eq!(catalog.get(ShaderKind::Write, &source), Some(ShaderHandle(99)));
        assert_eq!(catalog.get(ShaderKind::CombineAlpha, &source), None);
    }
}

use std::{fmt::Display, str::FromStr};

use log::{debug, info};
use serde::Serialize;

use crate::{
    config::ManagerConfig,
    engines::{BackendKind, Processor},
    errors::{RasterError, Result},
};

/// What a caller asks the manager for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Selection {
    /// First available backend in priority order.
    #[default]
    Auto,
    Backend(BackendKind),
}

impl FromStr for Selection {
    type Err = RasterError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(Selection::Auto)
        } else {
            s.parse().map(Selection::Backend)
        }
    }
}

impl From<BackendKind> for Selection {
    fn from(value: BackendKind) -> Self {
        Selection::Backend(value)
    }
}

impl Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selection::Auto => f.write_str("auto"),
            Selection::Backend(kind) => kind.fmt(f),
        }
    }
}

/// Availability of one known backend, as recorded when the manager was built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub kind: BackendKind,
    pub available: bool,
    /// Why the backend can't be used, `None` when available.
    pub reason: Option<String>,
}

/// Discovers usable backends and hands out fresh processors.
///
/// Availability is probed once per backend at construction and never changes
/// afterwards, so a manager can be shared between threads. Every [Processor]
/// it returns is a new instance owned by the caller.
#[derive(Debug, Clone)]
pub struct ProcessorManager {
    statuses: Vec<BackendStatus>,
}

impl Default for ProcessorManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorManager {
    /// Default priority, probing every backend.
    pub fn new() -> Self {
        Self::with_probe(BackendKind::PRIORITY, |kind| kind.probe())
    }

    /// Applies a priority override from `config`.
    pub fn from_config(config: &ManagerConfig) -> Result<Self> {
        Ok(Self::with_probe(config.priority()?, |kind| kind.probe()))
    }

    /// Priority from `TERRASCAN_PROCESSOR_PRIORITY`, if set.
    pub fn from_env() -> Result<Self> {
        Self::from_config(&ManagerConfig::from_env())
    }

    /// Uses `probe` instead of the engines' own capability probes.
    ///
    /// Backends that are not compiled in stay unavailable whatever `probe` says.
    pub fn with_probe(
        priority: impl IntoIterator<Item = BackendKind>,
        probe: impl Fn(BackendKind) -> bool,
    ) -> Self {
        let mut statuses: Vec<BackendStatus> = Vec::new();
        for kind in priority {
            if statuses.iter().any(|status| status.kind == kind) {
                continue;
            }
            let reason = if !kind.is_compiled() {
                Some("not compiled in".to_string())
            } else if !probe(kind) {
                Some("capability probe failed".to_string())
            } else {
                None
            };
            debug!(
                "{kind}: {}",
                reason.as_deref().unwrap_or("available")
            );
            statuses.push(BackendStatus {
                kind,
                available: reason.is_none(),
                reason,
            });
        }
        Self { statuses }
    }

    pub fn priority(&self) -> Vec<BackendKind> {
        self.statuses.iter().map(|status| status.kind).collect()
    }

    /// Available backends in priority order.
    pub fn list_available(&self) -> Vec<BackendKind> {
        self.statuses
            .iter()
            .filter(|status| status.available)
            .map(|status| status.kind)
            .collect()
    }

    /// Every known backend in priority order, available or not.
    pub fn list_all(&self) -> &[BackendStatus] {
        &self.statuses
    }

    pub fn status(&self, kind: BackendKind) -> Option<&BackendStatus> {
        self.statuses.iter().find(|status| status.kind == kind)
    }

    pub fn is_available(&self, kind: BackendKind) -> bool {
        self.status(kind).is_some_and(|status| status.available)
    }

    pub fn get(&self, selection: impl Into<Selection>) -> Result<Processor> {
        match selection.into() {
            Selection::Auto => {
                let kind = self.list_available().into_iter().next().ok_or_else(|| {
                    RasterError::NoBackendAvailable {
                        checked: self.priority(),
                    }
                })?;
                info!("auto selected {kind} backend");
                self.instantiate(kind)
            }
            Selection::Backend(kind) => {
                if !self.is_available(kind) {
                    return Err(RasterError::BackendUnavailable {
                        requested: kind.to_string(),
                        checked: vec![kind],
                    });
                }
                info!("selected {kind} backend");
                self.instantiate(kind)
            }
        }
    }

    /// `"auto"` or a backend identifier.
    pub fn get_named(&self, name: &str) -> Result<Processor> {
        self.get(name.parse::<Selection>()?)
    }

    pub fn get_default(&self) -> Result<Processor> {
        self.get(Selection::Auto)
    }

    fn instantiate(&self, kind: BackendKind) -> Result<Processor> {
        Processor::new(kind).ok_or_else(|| RasterError::BackendUnavailable {
            requested: kind.to_string(),
            checked: vec![kind],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::RasterProcessor;
    use rstest::rstest;

    fn only(available: &'static [BackendKind]) -> impl Fn(BackendKind) -> bool {
        move |kind| available.contains(&kind)
    }

    #[test]
    fn manager_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProcessorManager>();
    }

    #[test_log::test]
    fn auto_picks_highest_available() {
        let manager = ProcessorManager::with_probe(
            [BackendKind::Gdal, BackendKind::GeoTiff, BackendKind::Image],
            only(&[BackendKind::GeoTiff, BackendKind::Image]),
        );
        assert_eq!(
            manager.list_available(),
            vec![BackendKind::GeoTiff, BackendKind::Image]
        );
        assert_eq!(manager.get_default().unwrap().kind(), BackendKind::GeoTiff);
        assert_eq!(manager.get_named("AUTO").unwrap().kind(), BackendKind::GeoTiff);
    }

    #[test]
    fn override_reorders() {
        let manager = ProcessorManager::with_probe(
            [BackendKind::Image, BackendKind::GeoTiff],
            only(&[BackendKind::GeoTiff, BackendKind::Image]),
        );
        assert_eq!(manager.get(Selection::Auto).unwrap().kind(), BackendKind::Image);
        assert!(!manager.is_available(BackendKind::Gdal));
        assert_eq!(manager.status(BackendKind::Gdal), None);
    }

    #[test]
    fn nothing_available() {
        let manager = ProcessorManager::with_probe(BackendKind::PRIORITY, |_| false);
        assert!(manager.list_available().is_empty());
        assert!(matches!(
            manager.get_default(),
            Err(RasterError::NoBackendAvailable { checked }) if checked == BackendKind::PRIORITY.to_vec()
        ));
    }

    #[test]
    fn named_backend_must_be_available() {
        let manager =
            ProcessorManager::with_probe(BackendKind::PRIORITY, only(&[BackendKind::Image]));
        assert!(matches!(
            manager.get(BackendKind::GeoTiff),
            Err(RasterError::BackendUnavailable { requested, checked })
                if requested == "geotiff" && checked == vec![BackendKind::GeoTiff]
        ));
        assert!(matches!(
            manager.get_named("erdas"),
            Err(RasterError::BackendUnavailable { .. })
        ));
        assert_eq!(manager.get_named("image").unwrap().kind(), BackendKind::Image);
    }

    #[test]
    fn statuses_record_reasons() {
        let manager = ProcessorManager::with_probe(BackendKind::PRIORITY, only(&[BackendKind::Image]));
        let statuses = manager.list_all();
        assert_eq!(statuses.len(), 3);
        let geotiff = manager.status(BackendKind::GeoTiff).unwrap();
        assert!(!geotiff.available);
        assert_eq!(geotiff.reason.as_deref(), Some("capability probe failed"));
        let image = manager.status(BackendKind::Image).unwrap();
        assert_eq!(image.reason, None);
        if !BackendKind::Gdal.is_compiled() {
            assert_eq!(
                statuses[0].reason.as_deref(),
                Some("not compiled in")
            );
        }
    }

    #[rstest]
    #[case("auto", Selection::Auto)]
    #[case(" Auto ", Selection::Auto)]
    #[case("gdal", Selection::Backend(BackendKind::Gdal))]
    fn parses_selection(#[case] name: &str, #[case] expected: Selection) {
        assert_eq!(name.parse::<Selection>().unwrap(), expected);
    }

    #[test]
    fn real_probes_find_pure_rust_backends() {
        let manager = ProcessorManager::new();
        assert!(manager.is_available(BackendKind::GeoTiff));
        assert!(manager.is_available(BackendKind::Image));
        let processor = manager.get_default().unwrap();
        assert!(processor.is_available());
    }

    #[test]
    fn each_get_is_a_fresh_processor() {
        let manager = ProcessorManager::new();
        let mut first = manager.get(BackendKind::Image).unwrap();
        let second = manager.get(BackendKind::Image).unwrap();
        let png = {
            let mut bytes = std::io::Cursor::new(Vec::new());
            image::DynamicImage::new_luma8(2, 2)
                .write_to(&mut bytes, image::ImageFormat::Png)
                .unwrap();
            bytes.into_inner()
        };
        let handle = first.open(png.into()).unwrap();
        assert!(matches!(
            second.get_info(&handle),
            Err(RasterError::InvalidHandle(_))
        ));
        first.close(&handle);
    }
}

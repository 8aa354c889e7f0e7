//! Update Configuration
//!
//! Preferences that shape how trees are scheduled. None of these affect
//! correctness except the sink and animation type lists; the debug flags only
//! turn on extra logging and the consistency check.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::UpdateResult;

/// Default ceiling on scheduler steps before a walk is declared broken.
pub const DEFAULT_MAX_WALK_STEPS: usize = 1000;

/// Node types whose side effect is observable (viewers, object writers).
const OUTPUT_NODE_TYPES: &[&str] = &[
    // main viewers
    "SvVDExperimental",
    "SvStethoscopeNodeMK2",
    "SvBmeshViewerNodeV28",
    // viewers
    "Sv3DviewPropsNode",
    "SvMatrixViewer28",
    "SvIDXViewer28",
    "SvCurveViewerNodeV28",
    "SvPolylineViewerNodeV28",
    "SvTypeViewerNodeV28",
    "SvSkinViewerNodeV28",
    "SvMetaballOutNode",
    "SvNurbsCurveOutNode",
    "SvNurbsSurfaceOutNode",
    "SvGreasePencilStrokes",
    "SvEmptyOutNode",
    "SvTextureViewerNode",
    "SvTextureViewerNodeLite",
    "SvWaveformViewer",
    "SvConsoleNode",
    "SvLampOutNode",
    "SvInstancerNode",
    "SvInstancerNodeMK2",
    "SvDupliInstancesMK4",
    // text viewers
    "ViewerNodeTextMK3",
    "SvTextOutNodeMK2",
    "SvDataShapeNode",
    "SvDebugPrintNode",
    // other
    "SvSetPropNode",
    "SvObjRemoteNodeMK2",
    "SvSetDataObjectNodeMK2",
    "SvVertexGroupNodeMK2",
    "SvVertexColorNodeMK3",
    "SvAssignMaterialListNode",
    "SvMaterialIndexNode",
    "SvSetCustomUVMap",
    "SvMeshUVColorNode",
    "SvLatticePropsNode",
    "SvSculptMaskNode",
    "SvSetCustomMeshNormals",
    "SvParticlesMK2Node",
    "SvSetPropNodeMK2",
    "SvDictionaryOut",
];

const ANIMATION_NODE_TYPES: &[&str] = &["SvFrameInfoNodeMK2"];

/// Configuration shared by the mirror, the scheduler and the change detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Verbose logging preference.
    pub debug: bool,

    /// Log every update event. Only effective together with `debug`.
    pub log_update_events: bool,

    /// Scheduler safety ceiling.
    pub max_walk_steps: usize,

    /// Sink allow-list: nodes of these types anchor relevance.
    pub output_node_types: BTreeSet<String>,

    /// Node types recomputed unconditionally on animation updates.
    pub animation_node_types: BTreeSet<String>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_update_events: false,
            max_walk_steps: DEFAULT_MAX_WALK_STEPS,
            output_node_types: OUTPUT_NODE_TYPES.iter().map(|s| s.to_string()).collect(),
            animation_node_types: ANIMATION_NODE_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl UpdateConfig {
    /// Parse a preferences blob. Missing fields take their defaults.
    pub fn from_json(json: &str) -> UpdateResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Enables both debug switches.
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self.log_update_events = true;
        self
    }

    /// Replace the sink allow-list.
    pub fn with_output_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_node_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the animation node type list.
    pub fn with_animation_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.animation_node_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_walk_steps(mut self, steps: usize) -> Self {
        self.max_walk_steps = steps;
        self
    }

    /// True when the consistency check and event logging should run.
    pub fn is_in_debug_mode(&self) -> bool {
        self.debug && self.log_update_events
    }

    pub fn is_output_type(&self, type_id: &str) -> bool {
        self.output_node_types.contains(type_id)
    }

    pub fn is_animation_type(&self, type_id: &str) -> bool {
        self.animation_node_types.contains(type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_viewers() {
        let config = UpdateConfig::default();
        assert!(config.is_output_type("SvVDExperimental"));
        assert!(config.is_output_type("SvDebugPrintNode"));
        assert!(!config.is_output_type("SvScalarMathNodeMK4"));
        assert!(config.is_animation_type("SvFrameInfoNodeMK2"));
        assert_eq!(config.max_walk_steps, DEFAULT_MAX_WALK_STEPS);
        assert!(!config.is_in_debug_mode());
    }

    #[test]
    fn debug_mode_needs_both_flags() {
        let mut config = UpdateConfig {
            debug: true,
            ..UpdateConfig::default()
        };
        assert!(!config.is_in_debug_mode());
        config.log_update_events = true;
        assert!(config.is_in_debug_mode());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = UpdateConfig::from_json(r#"{"debug": true, "max_walk_steps": 50}"#).unwrap();
        assert!(config.debug);
        assert_eq!(config.max_walk_steps, 50);
        assert!(config.is_output_type("SvStethoscopeNodeMK2"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = UpdateConfig::from_json("{debug: yes}").unwrap_err();
        assert!(matches!(err, crate::error::UpdateError::Parse(_)));
    }
}

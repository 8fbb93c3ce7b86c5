//! Delegate (execution backend) selection.
//!
//! A delegate decides which hardware path the interpreter uses. CPU execution
//! ("default") is always available; accelerator delegates exist only when the
//! corresponding cargo feature is enabled.
//!
//! | Delegate | Name | Platform | Feature Flag |
//! |----------|------|----------|--------------|
//! | Default | `default` | All | (always) |
//! | CoreML | `core-ml` | macOS/iOS | `coreml` |
//! | Metal | `metal` | macOS/iOS | `metal` |
//!
//! Parsing is lenient: any name that is not recognized selects `Default`
//! instead of failing. A recognized accelerator that is missing from the build
//! is rejected later, when the loader configures the interpreter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution backend for an inference session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Delegate {
    /// CPU execution (always available)
    #[default]
    #[serde(rename = "default")]
    Default,

    /// Apple CoreML delegate (Neural Engine / GPU / CPU)
    #[serde(rename = "core-ml")]
    CoreMl,

    /// Metal GPU delegate
    #[serde(rename = "metal")]
    Metal,
}

impl Delegate {
    /// All delegates, in declaration order.
    pub const ALL: [Delegate; 3] = [Delegate::Default, Delegate::CoreMl, Delegate::Metal];

    /// Parses a delegate from the name passed by the runtime.
    ///
    /// Accepts `"core-ml"` and `"metal"`; everything else (including
    /// `"default"`) maps to [`Delegate::Default`].
    pub fn from_hint(hint: &str) -> Self {
        match hint {
            "core-ml" => Delegate::CoreMl,
            "metal" => Delegate::Metal,
            _ => Delegate::Default,
        }
    }

    /// Like [`Delegate::from_hint`] but treats a missing hint as `Default`.
    pub fn from_optional_hint(hint: Option<&str>) -> Self {
        hint.map(Self::from_hint).unwrap_or_default()
    }

    /// The name reported by the session's `delegate` property.
    pub fn as_str(&self) -> &'static str {
        match self {
            Delegate::Default => "default",
            Delegate::CoreMl => "core-ml",
            Delegate::Metal => "metal",
        }
    }

    /// Human-readable name used in error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Delegate::Default => "Default",
            Delegate::CoreMl => "CoreML",
            Delegate::Metal => "Metal",
        }
    }

    /// Whether this delegate requires accelerator hardware.
    pub fn requires_hardware(&self) -> bool {
        !matches!(self, Delegate::Default)
    }

    /// Whether this build was compiled with support for the delegate.
    pub fn compiled_in(&self) -> bool {
        match self {
            Delegate::Default => true,
            Delegate::CoreMl => cfg!(feature = "coreml"),
            Delegate::Metal => cfg!(feature = "metal"),
        }
    }
}

impl fmt::Display for Delegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

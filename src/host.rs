//! The boundary between the engine and the host runtime.
//!
//! The host's internal layout is an opaque, versioned capability set: methods are resolved by
//! name at attach time through [`Probe`], and absence is a normal outcome that disables only
//! the dependent feature. The bootstrap plumbing (out of scope here) implements [`HostRuntime`]
//! and routes every intercepted call into the engine's dispatch.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A dynamic value crossing the host boundary.
///
/// Host object handles are opaque [`Value::Object`] ids; URIs cross the boundary as strings.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Str(String),

    /// An opaque handle to a host-side object.
    Object(u64),
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }
}

/// An opaque host-assigned identifier for a resolved method.
///
/// Tokens are the keys the bootstrap uses when routing intercepted calls back into the engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MethodToken(pub u64);

/// A member signature: the method name plus its parameter type names.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Signature {
    name: String,
    params: Vec<String>,
}

impl Signature {
    pub fn new(name: &str, params: &[&str]) -> Signature {
        Signature {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(", "))
    }
}

/// Where a font file can be loaded from.
#[derive(Clone, Debug, PartialEq)]
pub enum FontSource {
    /// A file on disk, given by absolute path.
    File(PathBuf),

    /// A file bundled in the host package's assets, given by asset path.
    Asset(String),
}

/// The surface the host runtime presents to the engine.
///
/// Implemented by the bootstrap plumbing. Every method that can fail because the host simply
/// doesn't have the thing returns `Option`; genuine failures never cross this boundary.
pub trait HostRuntime: Send + Sync {
    /// Resolves a method by class path and signature. `None` means the member doesn't exist in
    /// this host version.
    fn resolve(&self, class_path: &str, signature: &Signature) -> Option<MethodToken>;

    /// Invokes a resolved method's native body, bypassing any installed hooks.
    fn invoke_original(&self, method: MethodToken, receiver: &Value, args: &[Value]) -> Value;

    /// Maps an integer resource id back to its symbolic entry name.
    fn resource_entry_name(&self, id: i64) -> Option<String>;

    /// The host OS API level, used for feature gating.
    fn api_level(&self) -> u32;

    /// Reads a system-provided palette color by resource name.
    fn system_color(&self, resource_name: &str) -> Option<u32>;

    /// Loads a single font for use in a fallback chain.
    fn load_font(&self, source: &FontSource) -> Option<Value>;

    /// Builds a typeface from a chain of loaded fonts, first font preferred.
    fn compose_typeface(&self, fonts: &[Value]) -> Option<Value>;

    /// Builds a single-family typeface directly from a font source.
    fn typeface_from_source(&self, source: &FontSource) -> Option<Value>;

    /// The host's own typeface construction by family name and style.
    fn fallback_typeface(&self, family: &str, style: i64) -> Value;
}

/// A resolved target method, with enough naming kept around for useful log output.
#[derive(Clone)]
pub struct Capability {
    token: MethodToken,
    class: String,
    signature: Signature,
}

impl Capability {
    pub fn token(&self) -> MethodToken {
        self.token
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.signature)
    }
}

/// Resolves target methods by name. Never fails: a missing member is a logged `None`, and the
/// caller is expected to no-op the dependent feature.
pub struct Probe {
    host: Arc<dyn HostRuntime>,
}

impl Probe {
    pub fn new(host: Arc<dyn HostRuntime>) -> Probe {
        Probe { host }
    }

    pub fn resolve(&self, class_path: &str, signature: Signature) -> Option<Capability> {
        match self.host.resolve(class_path, &signature) {
            Some(token) => Some(Capability {
                token,
                class: class_path.to_string(),
                signature,
            }),
            None => {
                log::debug!("capability absent: {class_path}.{signature}");
                None
            }
        }
    }
}

/// The fixed set of host members this loader patches. Class paths and signatures are pinned to
/// the one host application the loader is built for.
pub mod targets {
    use super::Signature;

    /// The package name the host's bundled resources are keyed to.
    pub const EXPECTED_PACKAGE: &str = "com.discord";

    pub const SCRIPT_RUNTIME: &str = "com.facebook.react.bridge.CatalystInstanceImpl";
    pub const THEME_UTILS: &str = "com.discord.theme.utils.ColorUtilsKt";
    pub const DARK_THEME: &str = "com.discord.theme.DarkTheme";
    pub const LIGHT_THEME: &str = "com.discord.theme.LightTheme";
    pub const FONT_MANAGER: &str = "com.facebook.react.views.text.ReactFontManager";
    pub const DRAWABLE_HELPER: &str = "com.facebook.react.views.imagehelper.ResourceDrawableIdHelper";
    pub const RESOURCES: &str = "android.content.res.Resources";

    pub fn load_script_from_assets() -> Signature {
        Signature::new("loadScriptFromAssets", &["AssetManager", "String", "boolean"])
    }

    pub fn load_script_from_file() -> Signature {
        Signature::new("loadScriptFromFile", &["String", "String", "boolean"])
    }

    pub fn set_global_variable() -> Signature {
        Signature::new("setGlobalVariable", &["String", "String"])
    }

    pub fn resolve_color() -> Signature {
        Signature::new("getColorCompat", &["Resources", "int", "Resources.Theme"])
    }

    pub fn resolve_color_legacy() -> Signature {
        Signature::new("getColorCompat", &["Context", "int"])
    }

    pub fn create_asset_typeface() -> Signature {
        Signature::new("createAssetTypeface", &["String", "int", "AssetManager"])
    }

    pub fn resource_drawable_uri() -> Signature {
        Signature::new("getResourceDrawableUri", &["Context", "String"])
    }

    pub fn get_identifier() -> Signature {
        Signature::new("getIdentifier", &["String", "String", "String"])
    }

    /// Signature for a no-argument theme color accessor such as `getTextNormal`.
    pub fn theme_accessor(name: &str) -> Signature {
        Signature::new(name, &[])
    }
}

//! End-to-end attach scenarios against a scripted host runtime.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use burrow::{
    attach, targets, AttachParams, Engine, FontSource, HostRuntime, MethodToken, Signature,
    Value, GLOBAL_NAME,
};

#[derive(Default)]
struct State {
    tokens: HashMap<String, MethodToken>,
    names: HashMap<MethodToken, String>,
    next: u64,
    calls: Vec<(String, Vec<Value>)>,
}

/// A scripted host: resolves members on demand, records native invocations, and serves canned
/// resource/typeface lookups.
struct FakeHost {
    state: Mutex<State>,
    api_level: u32,
    entry_names: HashMap<i64, String>,
    system_colors: HashMap<String, u32>,
    native_results: HashMap<String, Value>,
    absent: HashSet<String>,
    asset_fonts: HashSet<String>,
}

impl FakeHost {
    fn new() -> FakeHost {
        FakeHost {
            state: Mutex::new(State::default()),
            api_level: 33,
            entry_names: HashMap::new(),
            system_colors: HashMap::new(),
            native_results: HashMap::new(),
            absent: HashSet::new(),
            asset_fonts: HashSet::new(),
        }
    }

    fn token(&self, class: &str, signature: &Signature) -> MethodToken {
        self.resolve(class, signature).expect("member should resolve")
    }

    fn calls(&self) -> Vec<(String, Vec<Value>)> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, name: &str, args: &[Value]) {
        self.state
            .lock()
            .unwrap()
            .calls
            .push((name.to_string(), args.to_vec()));
    }
}

impl HostRuntime for FakeHost {
    fn resolve(&self, class_path: &str, signature: &Signature) -> Option<MethodToken> {
        if self.absent.contains(signature.name()) {
            return None;
        }

        let mut state = self.state.lock().unwrap();
        let key = format!("{class_path}.{signature}");

        if let Some(token) = state.tokens.get(&key) {
            return Some(*token);
        }

        state.next += 1;
        let token = MethodToken(state.next);
        state.tokens.insert(key, token);
        state.names.insert(token, signature.name().to_string());

        Some(token)
    }

    fn invoke_original(&self, method: MethodToken, _receiver: &Value, args: &[Value]) -> Value {
        let name = {
            let state = self.state.lock().unwrap();
            state
                .names
                .get(&method)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string())
        };

        self.record(&name, args);

        self.native_results
            .get(&name)
            .cloned()
            .unwrap_or(Value::Unit)
    }

    fn resource_entry_name(&self, id: i64) -> Option<String> {
        self.entry_names.get(&id).cloned()
    }

    fn api_level(&self) -> u32 {
        self.api_level
    }

    fn system_color(&self, resource_name: &str) -> Option<u32> {
        self.system_colors.get(resource_name).copied()
    }

    fn load_font(&self, source: &FontSource) -> Option<Value> {
        match source {
            FontSource::File(path) => path.is_file().then_some(Value::Object(10)),
            FontSource::Asset(name) => self.asset_fonts.contains(name).then_some(Value::Object(20)),
        }
    }

    fn compose_typeface(&self, fonts: &[Value]) -> Option<Value> {
        self.record("composeTypeface", fonts);
        Some(Value::Object(0xC0))
    }

    fn typeface_from_source(&self, source: &FontSource) -> Option<Value> {
        match source {
            FontSource::File(path) => path.is_file().then_some(Value::Object(1)),
            FontSource::Asset(name) => self.asset_fonts.contains(name).then_some(Value::Object(2)),
        }
    }

    fn fallback_typeface(&self, family: &str, style: i64) -> Value {
        self.record(
            "fallbackTypeface",
            &[Value::Str(family.to_string()), Value::Int(style)],
        );
        Value::Object(0xFA)
    }
}

/// A port nothing listens on, for scenarios where the fetch should fail fast.
const REFUSED_URL: &str = "http://127.0.0.1:1/bundle.js";

/// Data directory with a loader config pointing the bundle fetch at `url`, so no test ever
/// touches the real endpoint.
fn data_dir_with_url(url: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let files = dir.path().join("files").join("burrow");
    fs::create_dir_all(&files).unwrap();

    fs::write(
        files.join("loader.json"),
        format!(r#"{{"customLoadUrl": {{"enabled": true, "url": "{url}"}}}}"#),
    )
    .unwrap();

    dir
}

fn attach_host(host: &Arc<FakeHost>, data_dir: &Path, package: &str) -> Engine {
    attach(
        Arc::clone(host) as Arc<dyn HostRuntime>,
        AttachParams {
            data_dir: data_dir.to_path_buf(),
            package_name: package.to_string(),
            notifier: None,
        },
    )
    .expect("attach should succeed")
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                data.extend_from_slice(&buf[..n]);
                if data.windows(4).any(|window| window == b"\r\n\r\n") {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    String::from_utf8_lossy(&data).to_string()
}

/// Serves exactly one HTTP response, returning the request that was made for it.
fn serve_once(response: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/bundle.js", listener.local_addr().unwrap());

    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream);
        stream.write_all(response.as_bytes()).unwrap();
        request
    });

    (url, handle)
}

fn ok_response(body: &str, etag: Option<&str>) -> String {
    let etag_header = match etag {
        Some(etag) => format!("ETag: {etag}\r\n"),
        None => String::new(),
    };

    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n{}",
        body.len(),
        etag_header,
        body
    )
}

fn load_file_token(host: &FakeHost) -> MethodToken {
    host.token(targets::SCRIPT_RUNTIME, &targets::load_script_from_file())
}

#[test]
fn pipeline_injects_in_order_and_suppresses_the_native_loader() {
    let (url, server) = serve_once(ok_response("bundle-v1", Some("\"v1\"")));
    let dir = data_dir_with_url(&url);

    let preloads = dir.path().join("files/burrow/preloads");
    fs::create_dir_all(&preloads).unwrap();
    fs::write(preloads.join("20-late.js"), b"//").unwrap();
    fs::write(preloads.join("10-early.js"), b"//").unwrap();

    let host = Arc::new(FakeHost::new());
    let engine = attach_host(&host, dir.path(), "com.discord");

    let result = engine.dispatch(
        load_file_token(&host),
        Value::Object(1),
        vec![
            Value::Str("host.js".to_string()),
            Value::Str("host.js".to_string()),
            Value::Bool(false),
        ],
    );

    assert_eq!(result, Value::Unit);

    let request = server.join().unwrap().to_lowercase();
    assert!(request.contains("user-agent: burrow"));
    assert!(!request.contains("if-none-match"));

    let calls = host.calls();
    let names: Vec<&str> = calls.iter().map(|(name, _)| name.as_str()).collect();

    assert_eq!(
        names,
        vec![
            "setGlobalVariable",
            "loadScriptFromFile",
            "loadScriptFromFile",
            "loadScriptFromFile",
        ]
    );

    // The payload global goes in first, with every module's fragment present.
    assert_eq!(calls[0].1[0], Value::Str(GLOBAL_NAME.to_string()));
    let payload: serde_json::Value =
        serde_json::from_str(calls[0].1[1].as_str().unwrap()).unwrap();
    assert_eq!(payload["loaderName"], "Burrow");
    assert!(payload["loaderVersion"].is_string());
    assert_eq!(payload["hasThemeSupport"], true);
    assert_eq!(payload["storedTheme"], serde_json::Value::Null);
    assert_eq!(payload["fontPatch"], 1);
    assert_eq!(payload["isSysColorsSupported"], true);
    assert!(payload["sysColors"]["accent1"].is_array());

    // Preloads in sorted order, then the freshly fetched bundle, all with the original call's
    // sync flag.
    for (index, suffix) in [
        (1, "10-early.js"),
        (2, "20-late.js"),
        (3, "cache/burrow/bundle.js"),
    ] {
        assert!(
            calls[index].1[0].as_str().unwrap().ends_with(suffix),
            "call {index} should load {suffix}"
        );
        assert_eq!(calls[index].1[2], Value::Bool(false));
    }

    // The intercepted call's own script never reaches the native loader.
    assert!(calls
        .iter()
        .all(|(_, args)| args[0].as_str() != Some("host.js")));

    assert_eq!(
        fs::read_to_string(dir.path().join("cache/burrow/bundle.js")).unwrap(),
        "bundle-v1"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("cache/burrow/etag.txt")).unwrap(),
        "\"v1\""
    );
}

#[test]
fn not_modified_response_keeps_the_cache_byte_identical() {
    let (url, server) = serve_once("HTTP/1.1 304 Not Modified\r\nConnection: close\r\n\r\n".to_string());
    let dir = data_dir_with_url(&url);

    let cache = dir.path().join("cache/burrow");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("bundle.js"), b"cached-bundle").unwrap();
    fs::write(cache.join("etag.txt"), "\"v1\"").unwrap();

    let host = Arc::new(FakeHost::new());
    let engine = attach_host(&host, dir.path(), "com.discord");

    engine.dispatch(
        load_file_token(&host),
        Value::Object(1),
        vec![
            Value::Str("host.js".to_string()),
            Value::Str("host.js".to_string()),
            Value::Bool(true),
        ],
    );

    let request = server.join().unwrap().to_lowercase();
    assert!(request.contains("if-none-match: \"v1\""));

    assert_eq!(fs::read(cache.join("bundle.js")).unwrap(), b"cached-bundle");
    assert_eq!(fs::read_to_string(cache.join("etag.txt")).unwrap(), "\"v1\"");

    // The pre-existing bundle still runs.
    let calls = host.calls();
    let last = calls.last().unwrap();
    assert_eq!(last.0, "loadScriptFromFile");
    assert!(last.1[0].as_str().unwrap().ends_with("bundle.js"));
}

#[test]
fn changed_bundle_updates_bundle_and_etag_together() {
    let (url, server) = serve_once(ok_response("bundle-v2", Some("\"v2\"")));
    let dir = data_dir_with_url(&url);

    let cache = dir.path().join("cache/burrow");
    fs::create_dir_all(&cache).unwrap();
    fs::write(cache.join("bundle.js"), b"bundle-v1").unwrap();
    fs::write(cache.join("etag.txt"), "\"v1\"").unwrap();

    let host = Arc::new(FakeHost::new());
    let engine = attach_host(&host, dir.path(), "com.discord");

    engine.dispatch(
        load_file_token(&host),
        Value::Object(1),
        vec![
            Value::Str("host.js".to_string()),
            Value::Str("host.js".to_string()),
            Value::Bool(true),
        ],
    );

    let request = server.join().unwrap().to_lowercase();
    assert!(request.contains("if-none-match: \"v1\""));

    assert_eq!(
        fs::read_to_string(cache.join("bundle.js")).unwrap(),
        "bundle-v2"
    );
    assert_eq!(fs::read_to_string(cache.join("etag.txt")).unwrap(), "\"v2\"");
}

#[test]
fn failed_first_fetch_degrades_to_preloads_only() {
    let dir = data_dir_with_url(REFUSED_URL);

    let preloads = dir.path().join("files/burrow/preloads");
    fs::create_dir_all(&preloads).unwrap();
    fs::write(preloads.join("only.js"), b"//").unwrap();

    let host = Arc::new(FakeHost::new());
    let engine = attach_host(&host, dir.path(), "com.discord");

    let result = engine.dispatch(
        load_file_token(&host),
        Value::Object(1),
        vec![
            Value::Str("host.js".to_string()),
            Value::Str("host.js".to_string()),
            Value::Bool(true),
        ],
    );

    assert_eq!(result, Value::Unit);

    let calls = host.calls();
    let names: Vec<&str> = calls.iter().map(|(name, _)| name.as_str()).collect();

    assert_eq!(names, vec!["setGlobalVariable", "loadScriptFromFile"]);
    assert!(calls[1].1[0].as_str().unwrap().ends_with("only.js"));
}

#[test]
fn missing_script_runtime_disables_injection_without_aborting_attach() {
    let dir = data_dir_with_url(REFUSED_URL);

    let mut host = FakeHost::new();
    host.absent.insert("loadScriptFromFile".to_string());
    host.absent.insert("loadScriptFromAssets".to_string());
    host.absent.insert("setGlobalVariable".to_string());
    let host = Arc::new(host);

    let engine = attach_host(&host, dir.path(), "com.discord");

    // Unhooked calls pass straight through to the native body.
    let result = engine.dispatch(MethodToken(999), Value::Unit, vec![Value::Int(5)]);
    assert_eq!(result, Value::Unit);
    assert_eq!(host.calls().len(), 1);
}

#[test]
fn renamed_package_lookups_are_rewritten_to_the_expected_name() {
    let dir = data_dir_with_url(REFUSED_URL);

    let mut host = FakeHost::new();
    host.native_results
        .insert("getIdentifier".to_string(), Value::Int(77));
    let host = Arc::new(host);

    let engine = attach_host(&host, dir.path(), "com.example.clone");

    let token = host.token(targets::RESOURCES, &targets::get_identifier());

    let result = engine.dispatch(
        token,
        Value::Object(3),
        vec![
            Value::Str("app_name".to_string()),
            Value::Str("string".to_string()),
            Value::Str("com.example.clone".to_string()),
        ],
    );

    assert_eq!(result, Value::Int(77));

    let calls = host.calls();
    assert_eq!(calls[0].0, "getIdentifier");
    assert_eq!(calls[0].1[2], Value::Str("com.discord".to_string()));

    // Lookups for other packages are left alone.
    engine.dispatch(
        token,
        Value::Object(3),
        vec![
            Value::Str("app_name".to_string()),
            Value::Str("string".to_string()),
            Value::Str("android".to_string()),
        ],
    );

    assert_eq!(host.calls()[1].1[2], Value::Str("android".to_string()));
}

fn write_theme(dir: &Path) {
    let files = dir.join("files/burrow");
    fs::create_dir_all(&files).unwrap();

    fs::write(
        files.join("current-theme.json"),
        r##"{
            "id": "midnight",
            "selected": true,
            "data": {
                "name": "Midnight",
                "spec": 2,
                "semanticColors": {"TEXT_NORMAL": ["#101010", "#F0F0F0"]},
                "rawColors": {"BRAND_500": "#11223344"}
            }
        }"##,
    )
    .unwrap();
}

#[test]
fn semantic_colors_override_both_theme_variants() {
    let dir = data_dir_with_url(REFUSED_URL);
    write_theme(dir.path());

    let host = Arc::new(FakeHost::new());
    let engine = attach_host(&host, dir.path(), "com.discord");

    let dark = host.token(targets::DARK_THEME, &targets::theme_accessor("getTextNormal"));
    let light = host.token(targets::LIGHT_THEME, &targets::theme_accessor("getTextNormal"));

    assert_eq!(
        engine.dispatch(dark, Value::Object(1), vec![]),
        Value::Int(0xFF101010)
    );
    assert_eq!(
        engine.dispatch(light, Value::Object(1), vec![]),
        Value::Int(0xFFF0F0F0)
    );

    // The native getters never ran.
    assert!(host.calls().is_empty());
}

#[test]
fn raw_colors_override_resolution_by_entry_name() {
    let dir = data_dir_with_url(REFUSED_URL);
    write_theme(dir.path());

    let mut host = FakeHost::new();
    host.entry_names.insert(101, "brand_500".to_string());
    host.entry_names.insert(999, "other_color".to_string());
    host.native_results
        .insert("getColorCompat".to_string(), Value::Int(1));
    let host = Arc::new(host);

    let engine = attach_host(&host, dir.path(), "com.discord");

    let token = host.token(targets::THEME_UTILS, &targets::resolve_color());

    // Entry names are matched case-insensitively, and the RGBA hex has its alpha moved to the
    // top byte.
    let overridden = engine.dispatch(
        token,
        Value::Object(1),
        vec![Value::Object(2), Value::Int(101), Value::Object(3)],
    );
    assert_eq!(overridden, Value::Int(0x44112233));

    // Unthemed resources fall through to the native resolver.
    let native = engine.dispatch(
        token,
        Value::Object(1),
        vec![Value::Object(2), Value::Int(999), Value::Object(3)],
    );
    assert_eq!(native, Value::Int(1));
}

fn write_font_manifest(dir: &Path) {
    let files = dir.join("files/burrow");
    fs::create_dir_all(&files).unwrap();

    fs::write(
        files.join("fonts.json"),
        format!(
            r#"{{
                "name": "pack",
                "spec": 1,
                "hash": "abc",
                "main": {{"Inter": "{REFUSED_URL}/Inter.ttf"}}
            }}"#
        ),
    )
    .unwrap();
}

#[test]
fn typeface_creation_prefers_downloaded_fonts_and_defers_when_unresolved() {
    let dir = data_dir_with_url(REFUSED_URL);
    write_font_manifest(dir.path());

    let fonts = dir.path().join("files/burrow/downloads/fonts");
    fs::create_dir_all(&fonts).unwrap();
    fs::write(fonts.join("Inter.ttf"), b"font").unwrap();
    fs::write(fonts.join("Manual_bold.ttf"), b"font").unwrap();

    let host = Arc::new(FakeHost::new());
    let engine = attach_host(&host, dir.path(), "com.discord");

    // Files for families the manifest no longer defines are reconciled away at attach.
    assert!(!fonts.join("Manual_bold.ttf").exists());
    assert!(fonts.join("Inter.ttf").exists());

    let token = host.token(targets::FONT_MANAGER, &targets::create_asset_typeface());

    let regular = engine.dispatch(
        token,
        Value::Object(1),
        vec![
            Value::Str("Inter".to_string()),
            Value::Int(0),
            Value::Object(9),
        ],
    );
    assert_eq!(regular, Value::Object(1));

    // Nothing on disk or in assets: the host's own constructor gets the call.
    let missing = engine.dispatch(
        token,
        Value::Object(1),
        vec![
            Value::Str("Missing".to_string()),
            Value::Int(0),
            Value::Object(9),
        ],
    );
    assert_eq!(missing, Value::Object(0xFA));

    let fallbacks: Vec<_> = host
        .calls()
        .into_iter()
        .filter(|(name, _)| name == "fallbackTypeface")
        .collect();
    assert_eq!(
        fallbacks,
        vec![(
            "fallbackTypeface".to_string(),
            vec![Value::Str("Missing".to_string()), Value::Int(0)]
        )]
    );
}

#[test]
fn comma_separated_families_build_a_fallback_chain() {
    let dir = data_dir_with_url(REFUSED_URL);
    write_font_manifest(dir.path());

    let fonts = dir.path().join("files/burrow/downloads/fonts");
    fs::create_dir_all(&fonts).unwrap();
    fs::write(fonts.join("Inter.ttf"), b"font").unwrap();

    let host = Arc::new(FakeHost::new());
    let engine = attach_host(&host, dir.path(), "com.discord");

    let token = host.token(targets::FONT_MANAGER, &targets::create_asset_typeface());

    let chained = engine.dispatch(
        token,
        Value::Object(1),
        vec![
            Value::Str("Inter, Missing".to_string()),
            Value::Int(0),
            Value::Object(9),
        ],
    );

    assert_eq!(chained, Value::Object(0xC0));
}

#[test]
fn drawable_lookups_redirect_to_override_files() {
    let dir = data_dir_with_url(REFUSED_URL);

    let drawables = dir.path().join("files/burrow/drawables");
    fs::create_dir_all(&drawables).unwrap();
    fs::write(drawables.join("avatar.png"), b"png").unwrap();

    let mut host = FakeHost::new();
    host.native_results
        .insert("getResourceDrawableUri".to_string(), Value::Str("res://native".to_string()));
    let host = Arc::new(host);

    let engine = attach_host(&host, dir.path(), "com.discord");

    let token = host.token(targets::DRAWABLE_HELPER, &targets::resource_drawable_uri());

    let redirected = engine.dispatch(
        token,
        Value::Object(1),
        vec![Value::Object(2), Value::Str("avatar".to_string())],
    );

    let uri = redirected.as_str().unwrap();
    assert!(uri.starts_with("file://"));
    assert!(uri.ends_with("avatar.png"));

    let native = engine.dispatch(
        token,
        Value::Object(1),
        vec![Value::Object(2), Value::Str("unknown".to_string())],
    );
    assert_eq!(native, Value::Str("res://native".to_string()));
}

#[test]
fn older_hosts_report_sys_colors_unsupported() {
    let dir = data_dir_with_url(REFUSED_URL);

    let mut host = FakeHost::new();
    host.api_level = 28;
    let host = Arc::new(host);

    let engine = attach_host(&host, dir.path(), "com.discord");

    engine.dispatch(
        load_file_token(&host),
        Value::Object(1),
        vec![
            Value::Str("host.js".to_string()),
            Value::Str("host.js".to_string()),
            Value::Bool(true),
        ],
    );

    let calls = host.calls();
    let payload: serde_json::Value =
        serde_json::from_str(calls[0].1[1].as_str().unwrap()).unwrap();

    assert_eq!(payload["isSysColorsSupported"], false);
    assert!(payload.get("sysColors").is_none());
}

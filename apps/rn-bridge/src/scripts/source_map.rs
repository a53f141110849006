//! Rewrites bundle/source-map pairs so they resolve from local storage.

use crate::config::SourceRoots;
use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};
use serde_json::Value;
use url::Url;

static SOURCE_MAPPING_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^//[#@] ?sourceMappingURL=(.+?)[ \t\r]*$").expect("sourceMappingURL pattern")
});

/// URL of the bundle's source map: the last `sourceMappingURL` comment,
/// resolved against the bundle URL. Inline `data:` maps are ignored.
pub fn find_source_map_url(script_url: &Url, script_body: &str) -> Option<Url> {
    let reference = SOURCE_MAPPING_URL
        .captures_iter(script_body)
        .filter_map(|caps| caps.get(1))
        .last()?
        .as_str()
        .trim();
    if reference.is_empty() || reference.starts_with("data:") {
        return None;
    }
    script_url.join(reference).ok()
}

pub fn has_source_map_comment(script_body: &str) -> bool {
    script_body.contains("sourceMappingURL=")
}

pub fn append_source_map_url(mut script_body: String, map_url: &str) -> String {
    if !script_body.is_empty() && !script_body.ends_with('\n') {
        script_body.push('\n');
    }
    script_body.push_str("//# sourceMappingURL=");
    script_body.push_str(map_url);
    script_body
}

/// Points the bundle's comment at the map's local file name.
pub fn update_script_paths(script_body: &str, map_file_name: &str) -> String {
    let replacement = format!("//# sourceMappingURL={map_file_name}");
    SOURCE_MAPPING_URL
        .replace_all(script_body, NoExpand(&replacement))
        .into_owned()
}

/// Rewrites a downloaded source map for local consumption: `file` names the
/// local bundle, `sourceRoot` is folded into each source, remote roots are
/// mapped to local ones. Indexed maps are handled section by section.
pub fn rewrite_source_map(
    map_body: &str,
    script_file_name: &str,
    roots: Option<&SourceRoots>,
) -> Result<String, serde_json::Error> {
    let mut map: Value = serde_json::from_str(map_body)?;
    rewrite_map(&mut map, script_file_name, roots);
    serde_json::to_string(&map)
}

fn rewrite_map(map: &mut Value, script_file_name: &str, roots: Option<&SourceRoots>) {
    let Some(object) = map.as_object_mut() else {
        return;
    };

    if let Some(sections) = object.get_mut("sections").and_then(Value::as_array_mut) {
        for section in sections {
            if let Some(inner) = section.get_mut("map") {
                rewrite_map(inner, script_file_name, roots);
            }
        }
    }

    let source_root = object
        .get("sourceRoot")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    if let Some(sources) = object.get_mut("sources").and_then(Value::as_array_mut) {
        for source in sources.iter_mut() {
            let remapped = source
                .as_str()
                .map(|path| remap_source(&source_root, path, roots));
            if let Some(remapped) = remapped {
                *source = Value::String(remapped);
            }
        }
    }

    object.insert("sourceRoot".into(), Value::String(String::new()));
    object.insert("file".into(), Value::String(script_file_name.to_owned()));
}

fn remap_source(source_root: &str, source: &str, roots: Option<&SourceRoots>) -> String {
    let source = source.strip_prefix("file://").unwrap_or(source);
    let mut path = if source_root.is_empty() || is_absolute(source) {
        source.to_owned()
    } else {
        format!("{}/{}", source_root.trim_end_matches(['/', '\\']), source)
    };
    path = path.replace('\\', "/");

    if let Some(roots) = roots {
        let remote = roots.remote.replace('\\', "/");
        let remote = remote.trim_end_matches('/');
        if let Some(rest) = path.strip_prefix(remote) {
            if rest.is_empty() || rest.starts_with('/') {
                let local = roots.local.replace('\\', "/");
                path = format!("{}{}", local.trim_end_matches('/'), rest);
            }
        }
    }
    path
}

fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || path.starts_with('\\')
        || (bytes.len() > 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':')
        || path.contains("://")
}

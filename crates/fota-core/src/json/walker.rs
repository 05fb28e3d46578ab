//! Schema extraction over the flat token stream.
//!
//! The server speaks hawkBit DDI v1; the client only needs a handful of
//! fields from two resources. The walkers make a single linear pass,
//! match on key names and hand off to typed extractors. Shapes that do
//! not match are skipped, with two exceptions that mark the deployment
//! rejected: more than one chunk, and a chunk part other than `"os"`.

use tracing::{debug, error, warn};

use super::tokens::{tokenize, JsonError, JsonToken, TokenKind};

/// Fields extracted from the controller base resource.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollResource {
    /// Server-requested poll interval, seconds.
    pub sleep_secs: Option<u32>,
    /// Raw `deploymentBase` link, present when a deployment is pending.
    pub deployment_base_href: Option<String>,
    /// Whether the server asked for a config data upload.
    pub config_data_requested: bool,
}

/// Server-requested handling of an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateAction {
    Skip,
    Attempt,
    Forced,
}

/// Fields extracted from a deployment resource.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Deployment {
    /// Action id of this deployment.
    pub action_id: Option<i32>,
    /// Requested update handling.
    pub update_action: Option<UpdateAction>,
    /// Declared artifact size in bytes.
    pub file_size: usize,
    /// Raw artifact download link.
    pub download_href: Option<String>,
    /// Set when the deployment shape is unsupported; scanning may have
    /// stopped early and the deployment must not be installed.
    pub rejected: bool,
}

fn token_text<'a>(text: &'a str, tok: &JsonToken) -> &'a str {
    &text[tok.start..tok.end]
}

/// A key is a string token with exactly one child (its value).
fn is_key(tokens: &[JsonToken], i: usize, text: &str, name: &str) -> bool {
    tokens[i].kind == TokenKind::String
        && tokens[i].children == 1
        && token_text(text, &tokens[i]) == name
}

/// Index just past the subtree rooted at `i`.
fn skip_subtree(tokens: &[JsonToken], i: usize) -> usize {
    let mut j = i + 1;
    for _ in 0..tokens[i].children {
        j = skip_subtree(tokens, j);
    }
    j
}

/// Look up the value of a direct key of the object at `obj`.
fn find_key(tokens: &[JsonToken], text: &str, obj: usize, name: &str) -> Option<usize> {
    if tokens[obj].kind != TokenKind::Object {
        return None;
    }
    let mut j = obj + 1;
    for _ in 0..tokens[obj].children {
        if is_key(tokens, j, text, name) && j + 1 < tokens.len() {
            return Some(j + 1);
        }
        j = skip_subtree(tokens, j);
    }
    None
}

/// Find a key by name anywhere in the document, returning its value index.
fn find_key_anywhere(tokens: &[JsonToken], text: &str, name: &str) -> Option<usize> {
    (0..tokens.len()).find_map(|i| {
        if is_key(tokens, i, text, name) && i + 1 < tokens.len() {
            Some(i + 1)
        } else {
            None
        }
    })
}

/// Accumulate leading decimal digits; stops at the first non-digit.
fn atoi_prefix(s: &str) -> i64 {
    let mut val: i64 = 0;
    for b in s.bytes() {
        if !b.is_ascii_digit() {
            break;
        }
        val = val * 10 + i64::from(b - b'0');
    }
    val
}

/// Convert a `HH:MM:SS` string to seconds.
fn hhmmss_to_secs(s: &str) -> u32 {
    let field = |off: usize| -> u32 {
        s.get(off..)
            .map(|rest| atoi_prefix(&rest[..rest.len().min(2)]) as u32)
            .unwrap_or(0)
    };
    field(0) * 60 * 60 + field(3) * 60 + field(6)
}

fn root_object(tokens: &[JsonToken]) -> Result<(), JsonError> {
    match tokens.first() {
        Some(t) if t.kind == TokenKind::Object => Ok(()),
        _ => Err(JsonError::NotAnObject),
    }
}

/// Extract the poll fields from the controller base resource.
pub fn parse_poll_resource(text: &str) -> Result<PollResource, JsonError> {
    let tokens = tokenize(text)?;
    root_object(&tokens)?;

    let mut res = PollResource::default();

    // config -> polling -> sleep, format HH:MM:SS
    if let Some(sleep) = find_key(&tokens, text, 0, "config")
        .and_then(|cfg| find_key(&tokens, text, cfg, "polling"))
        .and_then(|polling| find_key(&tokens, text, polling, "sleep"))
    {
        if tokens[sleep].kind == TokenKind::String {
            let s = token_text(text, &tokens[sleep]);
            if s.len() > 8 {
                error!(sleep = %s, "Invalid poll sleep string");
            } else {
                let secs = hhmmss_to_secs(s);
                if secs > 0 {
                    res.sleep_secs = Some(secs);
                }
            }
        }
    }

    if let Some(href) = find_key_anywhere(&tokens, text, "deploymentBase")
        .and_then(|dep| find_key(&tokens, text, dep, "href"))
    {
        if tokens[href].kind == TokenKind::String {
            let href = token_text(text, &tokens[href]);
            debug!(href = %href, "Deployment base found");
            res.deployment_base_href = Some(href.to_string());
        }
    }

    if let Some(cd) = find_key_anywhere(&tokens, text, "configData") {
        if find_key(&tokens, text, cd, "href").is_some() {
            res.config_data_requested = true;
        }
    }

    Ok(res)
}

/// Extract the deployment fields from a deployment resource.
pub fn parse_deployment(text: &str) -> Result<Deployment, JsonError> {
    let tokens = tokenize(text)?;
    root_object(&tokens)?;

    let mut dep = Deployment::default();

    // Flat scan: `part` and `size` live nested inside the chunk entry, so
    // subtrees are not skipped here.
    let mut i = 1;
    while i < tokens.len() {
        if tokens[i].kind != TokenKind::String || tokens[i].children != 1 || i + 1 >= tokens.len()
        {
            i += 1;
            continue;
        }
        let value = i + 1;

        match token_text(text, &tokens[i]) {
            "id" => {
                let acid = atoi_prefix(token_text(text, &tokens[value])) as i32;
                debug!(action_id = acid, "Deployment action id");
                dep.action_id = Some(acid);
            }
            "deployment" => {
                if let Some(update) = find_key(&tokens, text, value, "update") {
                    dep.update_action = match token_text(text, &tokens[update]) {
                        "skip" => Some(UpdateAction::Skip),
                        "attempt" => Some(UpdateAction::Attempt),
                        "forced" => Some(UpdateAction::Forced),
                        _ => None,
                    };
                }
            }
            "chunks" => {
                if tokens[value].kind == TokenKind::Array && tokens[value].children != 1 {
                    error!(chunks = tokens[value].children, "Only one chunk is supported");
                    dep.rejected = true;
                    break;
                }
            }
            "part" => {
                if token_text(text, &tokens[value]) != "os" {
                    error!("Only part 'os' is supported");
                    dep.rejected = true;
                    break;
                }
            }
            "size" => {
                dep.file_size = atoi_prefix(token_text(text, &tokens[value])) as usize;
            }
            "download-http" => match find_key(&tokens, text, value, "href") {
                Some(href) if tokens[href].kind == TokenKind::String => {
                    dep.download_href = Some(token_text(text, &tokens[href]).to_string());
                }
                _ => {
                    warn!("No href entry for download-http");
                    dep.rejected = true;
                }
            },
            _ => {}
        }

        i += 1;
    }

    Ok(dep)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL_WITH_DEPLOYMENT: &str = r#"{
        "config": {"polling": {"sleep": "00:05:00"}},
        "_links": {
            "deploymentBase": {"href": "http://server:8080/DEFAULT/controller/v1/dev-1/deploymentBase/17"},
            "configData": {"href": "http://server:8080/DEFAULT/controller/v1/dev-1/configData"}
        }
    }"#;

    fn deployment_doc(chunks: &str) -> String {
        format!(
            r#"{{"id":"23","deployment":{{"download":"forced","update":"attempt","chunks":{chunks}}}}}"#
        )
    }

    fn os_chunk(size: usize) -> String {
        format!(
            r#"[{{"part":"os","version":"1.0","name":"fw","artifacts":[{{"size":{size},"_links":{{"download-http":{{"href":"http://server:8080/DEFAULT/controller/v1/dev-1/softwaremodules/5/artifacts/fw.bin"}}}}}}]}}]"#
        )
    }

    #[test]
    fn test_poll_resource_extraction() {
        let res = parse_poll_resource(POLL_WITH_DEPLOYMENT).unwrap();
        assert_eq!(res.sleep_secs, Some(300));
        assert!(res.config_data_requested);
        assert!(res
            .deployment_base_href
            .unwrap()
            .ends_with("deploymentBase/17"));
    }

    #[test]
    fn test_poll_resource_without_actions() {
        let res = parse_poll_resource(r#"{"config":{"polling":{"sleep":"00:00:30"}}}"#).unwrap();
        assert_eq!(res.sleep_secs, Some(30));
        assert_eq!(res.deployment_base_href, None);
        assert!(!res.config_data_requested);
    }

    #[test]
    fn test_oversized_sleep_string_skipped() {
        let res =
            parse_poll_resource(r#"{"config":{"polling":{"sleep":"000:00:301"}}}"#).unwrap();
        assert_eq!(res.sleep_secs, None);
    }

    #[test]
    fn test_deployment_single_os_chunk() {
        let doc = deployment_doc(&os_chunk(4096));
        let dep = parse_deployment(&doc).unwrap();

        assert!(!dep.rejected);
        assert_eq!(dep.action_id, Some(23));
        assert_eq!(dep.update_action, Some(UpdateAction::Attempt));
        assert_eq!(dep.file_size, 4096);
        assert!(dep.download_href.unwrap().ends_with("fw.bin"));
    }

    #[test]
    fn test_deployment_two_chunks_rejected() {
        let doc = deployment_doc(r#"[{"part":"os"},{"part":"bl"}]"#);
        let dep = parse_deployment(&doc).unwrap();

        assert!(dep.rejected);
        assert_eq!(dep.download_href, None);
    }

    #[test]
    fn test_deployment_wrong_part_rejected() {
        let doc = deployment_doc(r#"[{"part":"bootloader"}]"#);
        let dep = parse_deployment(&doc).unwrap();
        assert!(dep.rejected);
    }

    #[test]
    fn test_download_http_without_href_rejected() {
        let doc = deployment_doc(
            r#"[{"part":"os","artifacts":[{"size":10,"_links":{"download-http":{}}}]}]"#,
        );
        let dep = parse_deployment(&doc).unwrap();
        assert!(dep.rejected);
        assert_eq!(dep.file_size, 10);
    }

    #[test]
    fn test_root_must_be_object() {
        assert_eq!(parse_poll_resource("[1,2]"), Err(JsonError::NotAnObject));
    }
}

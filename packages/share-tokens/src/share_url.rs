// ABOUTME: Share URL construction, the sole wire format exposed to bearers
// ABOUTME: Builds fully-qualified document URLs with token and option query parameters

use url::Url;

use crate::error::{ShareTokenError, ShareTokenResult};
use crate::types::ShareAction;

/// Optional query parameters for a share URL.
#[derive(Debug, Clone, Default)]
pub struct ShareUrlOptions {
    pub action: Option<ShareAction>,
    pub preview: bool,
    pub embed: bool,
}

/// Build `{base}/documents/{id}/shared?token=...` with the requested
/// options. The `url` crate percent-encodes path segments and query
/// values, so hostile document ids cannot break out of the path.
pub fn generate_share_url(
    base_url: &str,
    document_id: &str,
    token: &str,
    options: &ShareUrlOptions,
) -> ShareTokenResult<String> {
    let mut url =
        Url::parse(base_url).map_err(|e| ShareTokenError::InvalidBaseUrl(e.to_string()))?;

    url.path_segments_mut()
        .map_err(|_| ShareTokenError::InvalidBaseUrl("URL cannot be a base".to_string()))?
        .push("documents")
        .push(document_id)
        .push("shared");

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("token", token);
        if let Some(action) = options.action {
            query.append_pair("action", action.as_str());
        }
        if options.preview {
            query.append_pair("preview", "true");
        }
        if options.embed {
            query.append_pair("embed", "true");
        }
    }

    Ok(url.to_string())
}

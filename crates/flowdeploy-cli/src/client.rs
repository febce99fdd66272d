use flowdeploy_common::ErrorBody;

pub fn url(master_url: &str, path: &str) -> String {
    format!("{}{path}", master_url.trim_end_matches('/'))
}

/// Readable message for a failed master response.
pub async fn error_text(resp: reqwest::Response) -> String {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => format!(
            "{:?}: {} ({})",
            err.error.code, err.error.message, err.error.request_id
        ),
        Err(_) => format!("{status}: {body}"),
    }
}

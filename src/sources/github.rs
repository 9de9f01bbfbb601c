//! Raw file fetching from GitHub for data sources without a local mount.

use anyhow::{Context, Result};

use crate::config::GitHubSource;

/// Fetch a raw file from a GitHub repository, optionally authenticated with
/// a token read from a mounted file.
pub async fn fetch_github_file(src: &GitHubSource, client: &reqwest::Client) -> Result<Vec<u8>> {
    let git_ref = if src.git_ref.is_empty() {
        "main"
    } else {
        src.git_ref.as_str()
    };

    let url = format!(
        "https://raw.githubusercontent.com/{}/{}/{}",
        src.repo, git_ref, src.file_path
    );

    let mut request = client.get(&url);
    match read_token(&src.token_file) {
        Ok(token) if !token.is_empty() => {
            request = request.header("Authorization", format!("token {token}"));
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(
                token_file = src.token_file,
                error = %err,
                "failed to read github token, proceeding without auth"
            );
        }
    }

    let resp = request.send().await.with_context(|| format!("fetching {url}"))?;
    if !resp.status().is_success() {
        anyhow::bail!("fetching {}: status {}", url, resp.status().as_u16());
    }

    Ok(resp.bytes().await.context("reading body")?.to_vec())
}

fn read_token(path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok(String::new());
    }
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    Ok(data.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_token() {
        assert_eq!(read_token("").unwrap(), "");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  ghp_secret  ").unwrap();
        file.flush().unwrap();
        assert_eq!(read_token(file.path().to_str().unwrap()).unwrap(), "ghp_secret");

        assert!(read_token("/nonexistent/token").is_err());
    }
}

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::OpsContext;
use crate::index::INDEX_FILE_NAME;

/// Copy the object at `url` to `out`, the Helm downloader-plugin protocol.
///
/// Returns the number of bytes written.
pub async fn download<W>(ctx: &OpsContext, url: &str, out: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let data = match ctx.storage.fetch_raw(url).await {
        Ok(data) => data,
        Err(e) if e.is_not_found() && url.ends_with(INDEX_FILE_NAME) => {
            let repo = url.trim_end_matches(INDEX_FILE_NAME).trim_end_matches('/');
            return Err(anyhow::Error::new(e).context(format!(
                "The index file does not exist by the path {url}. \
                 If you haven't initialized the repository yet, try running `helm oss init {repo}`"
            )));
        }
        Err(e) => {
            return Err(anyhow::Error::new(e).context(format!("fetch from oss url={url}")))
        }
    };

    out.write_all(&data).await?;
    out.flush().await?;
    debug!(url, size = data.len(), "Downloaded object");
    Ok(data.len() as u64)
}

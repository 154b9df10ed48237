use std::path::Path;

use anyhow::Context;
use relay_core::Channel;

pub(crate) fn load_channels_file(path: &Path) -> anyhow::Result<Vec<Channel>> {
    let raw = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    parse_channels(&raw).with_context(|| format!("parse {}", path.display()))
}

fn parse_channels(raw: &[u8]) -> anyhow::Result<Vec<Channel>> {
    let channels: Vec<Channel> = serde_json::from_slice(raw)?;
    let mut seen = std::collections::HashSet::new();
    for channel in &channels {
        anyhow::ensure!(seen.insert(channel.id), "duplicate channel id {}", channel.id);
    }
    Ok(channels)
}

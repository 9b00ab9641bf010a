//! Playlist normalization
//!
//! Turns upstream material (M3U text per category, or JSON search results)
//! into [`PlaylistEntry`] values with resolved group labels and rewritten
//! stream URLs, and renders entries back into playlist lines.

use lazy_static::lazy_static;
use regex::Regex;
use std::fmt::Write as _;
use url::Url;

use crate::models::{json_id_to_string, ChannelIcon, PlaylistEntry, SearchChannel};
use crate::services::grouping::GroupingRules;
use crate::services::locale;
use crate::services::rewriter::{RewriteOutcome, StreamRewriter};

const EXTINF_PREFIX: &str = "#EXTINF:";
const HEADER_PREFIX: &str = "#EXTM3U";
const GROUP_PREFIX: &str = "#EXTGRP:";

/// Engine path search results are referenced through before rewriting
const GETSTREAM_PATH: &str = "/ace/getstream";

/// Line terminator of rendered documents
pub const LINE_TERMINATOR: &str = "\r\n";

lazy_static! {
    /// Regex to parse EXTINF attributes (tvg-id="...", group-title="...", etc)
    static ref ATTR_REGEX: Regex = Regex::new(r#"([\w-]+)="([^"]*)""#).unwrap();

    /// Regex to extract duration from EXTINF line
    static ref DURATION_REGEX: Regex = Regex::new(r"^\s*(-?\d+)").unwrap();
}

/// Parsed EXTINF line data
#[derive(Debug, Default)]
struct ExtinfData {
    duration: i64,
    attributes: Vec<(String, String)>,
    title: String,
}

/// Parse an EXTINF line
/// Format: #EXTINF:duration tvg-id="..." tvg-name="..." tvg-logo="..." group-title="...",Title
fn parse_extinf(line: &str) -> Option<ExtinfData> {
    let content = line.strip_prefix(EXTINF_PREFIX)?;

    // The title follows the first comma outside quoted attribute values
    let mut in_quotes = false;
    let comma = content.char_indices().find_map(|(i, c)| match c {
        '"' => {
            in_quotes = !in_quotes;
            None
        }
        ',' if !in_quotes => Some(i),
        _ => None,
    })?;

    let header = &content[..comma];
    let title = content[comma + 1..].trim().to_string();

    let duration = DURATION_REGEX
        .captures(header)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(-1);

    let attributes = ATTR_REGEX
        .captures_iter(header)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect();

    Some(ExtinfData {
        duration,
        attributes,
        title,
    })
}

/// `-1` means "live" upstream; players handle `0` more consistently
fn normalize_duration(duration: i64) -> i64 {
    if duration == -1 {
        0
    } else {
        duration
    }
}

/// Entries produced from one upstream source
#[derive(Debug, Default)]
pub struct TransformedPlaylist {
    pub entries: Vec<PlaylistEntry>,
    /// Entries dropped for lacking a content identifier
    pub skipped: usize,
    /// Search items left out by the grouping rules
    pub filtered: usize,
    pub warnings: Vec<String>,
}

/// Entry being assembled while scanning lines
struct PendingEntry {
    entry: PlaylistEntry,
    line_no: usize,
}

/// Normalizes upstream playlists into grouped, rewritten entries
#[derive(Debug, Clone)]
pub struct PlaylistTransformer {
    default_group: String,
    passthrough_directives: Vec<String>,
    grouping: GroupingRules,
}

impl PlaylistTransformer {
    pub fn new(default_group: impl Into<String>, passthrough_directives: Vec<String>) -> Self {
        Self {
            default_group: default_group.into(),
            passthrough_directives,
            grouping: GroupingRules::default(),
        }
    }

    /// Replace the rules used for search results
    pub fn with_grouping(mut self, grouping: GroupingRules) -> Self {
        self.grouping = grouping;
        self
    }

    fn is_passthrough(&self, line: &str) -> bool {
        let name = line.split(':').next().unwrap_or(line);
        self.passthrough_directives
            .iter()
            .any(|d| d.eq_ignore_ascii_case(name))
    }

    /// Deduplicate labels keeping first occurrence; empty set gets the default group
    fn finalize_groups(&self, labels: Vec<String>) -> Vec<String> {
        let mut groups: Vec<String> = Vec::with_capacity(labels.len().max(1));
        for label in labels {
            let label = label.trim();
            if !label.is_empty() && !groups.iter().any(|g| g == label) {
                groups.push(label.to_string());
            }
        }
        if groups.is_empty() {
            groups.push(self.default_group.clone());
        }
        groups
    }

    /// Normalize one upstream M3U document
    ///
    /// `label` is the display label of the category the document was fetched
    /// for. Each entry is additionally grouped under the countries listed in
    /// its `tvg-country` attribute.
    pub fn transform_playlist(
        &self,
        text: &str,
        label: Option<&str>,
        rewriter: &StreamRewriter,
    ) -> TransformedPlaylist {
        let mut out = TransformedPlaylist::default();
        let mut pending: Option<PendingEntry> = None;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(HEADER_PREFIX) {
                continue;
            }

            if line.starts_with(EXTINF_PREFIX) {
                if let Some(previous) = pending.take() {
                    self.finish_entry(previous, None, rewriter, &mut out);
                }

                match parse_extinf(line) {
                    Some(extinf) => {
                        pending = Some(PendingEntry {
                            entry: self.entry_from_extinf(extinf, label),
                            line_no,
                        });
                    }
                    None => out
                        .warnings
                        .push(format!("line {}: #EXTINF without title separator", line_no)),
                }
                continue;
            }

            if line.starts_with('#') {
                if let Some(current) = pending.as_mut() {
                    if self.is_passthrough(line) {
                        current.entry.directives.push(line.to_string());
                    }
                }
                continue;
            }

            match pending.take() {
                Some(current) => self.finish_entry(current, Some(line), rewriter, &mut out),
                None => out
                    .warnings
                    .push(format!("line {}: stream URL without #EXTINF", line_no)),
            }
        }

        if let Some(last) = pending.take() {
            self.finish_entry(last, None, rewriter, &mut out);
        }

        out
    }

    fn entry_from_extinf(&self, extinf: ExtinfData, label: Option<&str>) -> PlaylistEntry {
        let mut entry = PlaylistEntry {
            title: extinf.title,
            duration: normalize_duration(extinf.duration),
            ..Default::default()
        };

        let mut labels: Vec<String> = label.map(str::to_string).into_iter().collect();

        for (key, value) in extinf.attributes {
            match key.as_str() {
                "tvg-id" if !value.is_empty() => entry.tvg_id = Some(value),
                "tvg-name" if !value.is_empty() => entry.tvg_name = Some(value),
                "tvg-logo" if !value.is_empty() => entry.tvg_logo = Some(value),
                // regrouped below
                "group-title" => {}
                "tvg-country" => {
                    labels.extend(
                        value
                            .split(|c| c == ';' || c == ',')
                            .filter(|code| !code.trim().is_empty())
                            .map(locale::country_label_or_code),
                    );
                    entry.attributes.push((key, value));
                }
                _ => entry.attributes.push((key, value)),
            }
        }

        entry.groups = self.finalize_groups(labels);
        entry
    }

    fn finish_entry(
        &self,
        pending: PendingEntry,
        url: Option<&str>,
        rewriter: &StreamRewriter,
        out: &mut TransformedPlaylist,
    ) {
        let mut entry = pending.entry;

        if let Some(url) = url {
            match rewriter.rewrite(url) {
                RewriteOutcome::MissingIdentifier(_) => {
                    tracing::debug!(line = pending.line_no, title = %entry.title, "entry without content identifier skipped");
                    out.skipped += 1;
                    return;
                }
                outcome => entry.stream_url = Some(outcome.into_url()),
            }
        }

        out.entries.push(entry);
    }

    /// Convert search results into entries, one per item carrying an infohash
    ///
    /// `origin` is the search service origin; stream references are built as
    /// `<origin>/ace/getstream?<content-param>=<infohash>` and then rewritten.
    pub fn entries_from_search(
        &self,
        channels: &[SearchChannel],
        origin: &Url,
        rewriter: &StreamRewriter,
    ) -> TransformedPlaylist {
        let mut out = TransformedPlaylist::default();

        for channel in channels {
            let name = channel
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or("Unknown");

            let epg_title = channel
                .epg
                .first()
                .and_then(|p| p.name.as_deref())
                .map(str::trim)
                .filter(|t| !t.is_empty());

            let title = match epg_title {
                Some(epg) => format!("{} — {}", name, epg),
                None => name.to_string(),
            };

            let logo = pick_logo(&channel.icons);

            for item in &channel.items {
                let Some(infohash) = item.infohash.as_deref().filter(|h| !h.is_empty()) else {
                    out.skipped += 1;
                    continue;
                };

                let Some(labels) = self.grouping.labels_for(item, infohash) else {
                    out.filtered += 1;
                    continue;
                };

                let mut reference = origin.clone();
                reference.set_path(GETSTREAM_PATH);
                reference
                    .query_pairs_mut()
                    .clear()
                    .append_pair(rewriter.content_param(), infohash);

                let tvg_id = item
                    .channel_id
                    .as_ref()
                    .and_then(json_id_to_string)
                    .or_else(|| channel.channel_id.as_ref().and_then(json_id_to_string));

                out.entries.push(PlaylistEntry {
                    title: title.clone(),
                    duration: 0,
                    tvg_id,
                    tvg_name: Some(name.to_string()),
                    tvg_logo: logo.clone(),
                    groups: self.finalize_groups(labels),
                    attributes: Vec::new(),
                    directives: Vec::new(),
                    stream_url: Some(rewriter.rewrite(reference.as_str()).into_url()),
                });
            }
        }

        out.entries = self.grouping.order(out.entries);
        out
    }
}

/// First icon of type 0, otherwise the first icon with a URL
fn pick_logo(icons: &[ChannelIcon]) -> Option<String> {
    let with_url = || icons.iter().filter(|i| i.url.as_deref().map_or(false, |u| !u.is_empty()));

    with_url()
        .find(|i| i.kind == Some(0))
        .or_else(|| with_url().next())
        .and_then(|i| i.url.clone())
}

/// Attribute values cannot carry double quotes
fn attr_value(value: &str) -> String {
    value.replace('"', "'")
}

/// Append the blocks of one entry: one block per group label
pub fn render_entry(entry: &PlaylistEntry, lines: &mut Vec<String>) {
    for group in &entry.groups {
        let mut info = format!("{}{}", EXTINF_PREFIX, entry.duration);
        if let Some(id) = &entry.tvg_id {
            let _ = write!(info, r#" tvg-id="{}""#, attr_value(id));
        }
        if let Some(name) = &entry.tvg_name {
            let _ = write!(info, r#" tvg-name="{}""#, attr_value(name));
        }
        if let Some(logo) = &entry.tvg_logo {
            let _ = write!(info, r#" tvg-logo="{}""#, attr_value(logo));
        }
        let _ = write!(info, r#" group-title="{}""#, attr_value(group));
        for (key, value) in &entry.attributes {
            let _ = write!(info, r#" {}="{}""#, key, attr_value(value));
        }
        info.push(',');
        info.push_str(&entry.title);

        lines.push(info);
        lines.push(format!("{}{}", GROUP_PREFIX, group));
        lines.extend(entry.directives.iter().cloned());
        if let Some(url) = &entry.stream_url {
            lines.push(url.clone());
        }
    }
}

/// Header line declaring EPG source and catch-up support
pub fn document_header(epg_url: Option<&str>, catchup_days: u32) -> String {
    let mut header = HEADER_PREFIX.to_string();
    if let Some(epg) = epg_url.filter(|u| !u.is_empty()) {
        let epg = attr_value(epg);
        let _ = write!(header, r#" url-tvg="{}" x-tvg-url="{}""#, epg, epg);
    }
    let _ = write!(header, r#" catchup="shift" catchup-days="{}""#, catchup_days);
    header
}

/// Full document: header, every block, CRLF after every line
pub fn render_document<'a>(
    header: &str,
    entries: impl IntoIterator<Item = &'a PlaylistEntry>,
) -> String {
    let mut lines = vec![header.to_string()];
    for entry in entries {
        render_entry(entry, &mut lines);
    }

    let mut document = lines.join(LINE_TERMINATOR);
    document.push_str(LINE_TERMINATOR);
    document
}

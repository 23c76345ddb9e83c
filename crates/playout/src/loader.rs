//! Builds per-layer composite VOD sequences from the configured sources.
//!
//! The first source is the structural reference: a master playlist defines
//! the layer count, a media playlist is a single-layer stream. Every
//! subsequent source must present the same layer count and is appended to
//! the corresponding layers in order. Only the reference (first) layer's
//! per-source shape is recorded for the time mapping; see
//! [`ReferencePlaylistInfo`](crate::sync::ReferencePlaylistInfo).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist, QuotedOrUnquoted, Resolution};
use tracing::{debug, info, warn};

use crate::config::{PlayoutConfig, expand_template};
use crate::error::PlayoutError;
use crate::layer::{Layer, VodSegment};
use crate::sync::ReferencePlaylistInfo;
use crate::window::LiveWindow;

/// Everything the engine needs out of the configured sources.
#[derive(Debug)]
pub struct LoadedSources {
    pub layers: Vec<Layer>,
    pub reference: Vec<ReferencePlaylistInfo>,
    /// Master manifest to publish at the output root; `None` for
    /// single-layer streams.
    pub master: Option<MasterPlaylist>,
    /// Reference layer's nominal segment duration in seconds
    /// (`EXT-X-TARGETDURATION`), the scheduling tick granularity.
    pub target_duration: u64,
}

pub fn load(config: &PlayoutConfig) -> Result<LoadedSources, PlayoutError> {
    let mut sources = config.sources.iter();
    let first_source = sources.next().ok_or_else(|| PlayoutError::Config {
        key: "sources",
        reason: "provide at least one source".to_string(),
    })?;

    info!(source = %first_source.display(), "using first source as structural reference");

    let mut reference = Vec::new();
    let mut target_duration = 0u64;

    // Parse the reference source and discover the layer set.
    let (mut layers, master) = match parse_source(first_source)? {
        Playlist::MasterPlaylist(mut master_playlist) => {
            let mut layers = Vec::new();
            let variant_count = master_playlist
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .count();
            for (index, variant) in master_playlist
                .variants
                .iter_mut()
                .filter(|v| !v.is_i_frame)
                .enumerate()
            {
                let sub_path = resolve(first_source, &variant.uri);
                let media = parse_media_source(&sub_path)?;
                if index == 0 {
                    reference.push(reference_info(&media));
                    target_duration = media.target_duration;
                }

                let layer_folder = expand_template(&config.layer_dir_template, index as u64);
                normalize_variant(variant);
                variant.uri = format!("{layer_folder}/{}", config.playlist_name);

                let dir = config.output_dir.join(&layer_folder);
                layers.push(Layer {
                    vod: vod_segments(&media, &sub_path),
                    window: LiveWindow::new(
                        config.live_max_segments,
                        config.track_discontinuity_sequence,
                    ),
                    manifest_path: dir.join(&config.playlist_name),
                    dir,
                });
            }
            debug!(layers = variant_count, "reference master playlist parsed");
            (layers, Some(master_playlist))
        }
        Playlist::MediaPlaylist(media) => {
            reference.push(reference_info(&media));
            target_duration = media.target_duration;
            let layer = Layer {
                vod: vod_segments(&media, first_source),
                window: LiveWindow::new(
                    config.live_max_segments,
                    config.track_discontinuity_sequence,
                ),
                dir: config.output_dir.clone(),
                manifest_path: config.output_dir.join(&config.playlist_name),
            };
            (vec![layer], None)
        }
    };

    info!("found {} layer(s)", layers.len());

    // Append the remaining sources onto the per-layer sequences.
    for source in sources {
        debug!(source = %source.display(), "appending source");
        match parse_source(source)? {
            Playlist::MediaPlaylist(media) => {
                if layers.len() != 1 || master.is_some() {
                    return Err(layer_count_mismatch(source));
                }
                reference.push(reference_info(&media));
                append(&mut layers[0].vod, vod_segments(&media, source));
            }
            Playlist::MasterPlaylist(appended) => {
                let variants: Vec<_> =
                    appended.variants.iter().filter(|v| !v.is_i_frame).collect();
                if master.is_none() || variants.len() != layers.len() {
                    return Err(layer_count_mismatch(source));
                }
                // Layers are matched by position, as appended sources are
                // expected to declare their variants in the same order.
                for (index, variant) in variants.iter().enumerate() {
                    let sub_path = resolve(source, &variant.uri);
                    let media = parse_media_source(&sub_path)?;
                    if index == 0 {
                        reference.push(reference_info(&media));
                    }
                    append(&mut layers[index].vod, vod_segments(&media, &sub_path));
                }
            }
        }
    }

    let segments_total = layers
        .first()
        .map(|layer| layer.vod.len())
        .unwrap_or_default();
    for (index, layer) in layers.iter().enumerate() {
        if layer.vod.len() != segments_total {
            warn!(
                layer = index,
                segments = layer.vod.len(),
                reference_segments = segments_total,
                "layer segment count differs from the reference layer; \
                 playback will desynchronize"
            );
        }
    }

    Ok(LoadedSources {
        layers,
        reference,
        master,
        target_duration,
    })
}

fn parse_source(path: &Path) -> Result<Playlist, PlayoutError> {
    let bytes = fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => PlayoutError::Source {
            path: path.to_path_buf(),
            reason: "not found".to_string(),
        },
        _ => PlayoutError::io(path, source),
    })?;

    m3u8_rs::parse_playlist_res(&bytes).map_err(|e| PlayoutError::Playlist {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn parse_media_source(path: &Path) -> Result<MediaPlaylist, PlayoutError> {
    match parse_source(path)? {
        Playlist::MediaPlaylist(media) => Ok(media),
        Playlist::MasterPlaylist(_) => Err(PlayoutError::Playlist {
            path: path.to_path_buf(),
            reason: "expected a media playlist, got a master playlist".to_string(),
        }),
    }
}

fn layer_count_mismatch(source: &Path) -> PlayoutError {
    PlayoutError::Source {
        path: source.to_path_buf(),
        reason: "layer count mismatch with the reference source".to_string(),
    }
}

/// Resolves a playlist-relative URI against the playlist's own directory.
fn resolve(playlist_path: &Path, uri: &str) -> PathBuf {
    let uri = Path::new(uri);
    if uri.is_absolute() {
        return uri.to_path_buf();
    }
    playlist_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(uri)
}

fn vod_segments(media: &MediaPlaylist, playlist_path: &Path) -> Vec<VodSegment> {
    media
        .segments
        .iter()
        .map(|segment| VodSegment {
            duration: segment.duration,
            uri: resolve(playlist_path, &segment.uri),
            discontinuity: segment.discontinuity,
        })
        .collect()
}

fn reference_info(media: &MediaPlaylist) -> ReferencePlaylistInfo {
    ReferencePlaylistInfo {
        duration_ms: media
            .segments
            .iter()
            .map(|segment| (f64::from(segment.duration) * 1000.0).round() as i64)
            .sum(),
        segment_count: media.segments.len(),
    }
}

/// Appends a source's segments to a layer, splicing with a discontinuity
/// marker at the boundary.
fn append(vod: &mut Vec<VodSegment>, mut appended: Vec<VodSegment>) {
    if let Some(first) = appended.first_mut() {
        first.discontinuity = true;
    }
    vod.append(&mut appended);
}

/// Normalizes variant attributes to forms the serializer round-trips; a
/// `RESOLUTION` stranded in the free-form attribute map is lifted into the
/// typed field.
fn normalize_variant(variant: &mut m3u8_rs::VariantStream) {
    if variant.resolution.is_some() {
        return;
    }
    if let Some(value) = variant
        .other_attributes
        .as_mut()
        .and_then(|attrs| attrs.remove("RESOLUTION"))
    {
        let raw = match value {
            QuotedOrUnquoted::Quoted(s) | QuotedOrUnquoted::Unquoted(s) => s,
        };
        if let Some((width, height)) = raw.split_once('x')
            && let (Ok(width), Ok(height)) = (width.parse(), height.parse())
        {
            variant.resolution = Some(Resolution { width, height });
        }
    }
}

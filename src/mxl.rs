//! MXL file handler: reads compressed MusicXML (.mxl) archives.
//!
//! An .mxl file is a ZIP archive containing:
//!   - META-INF/container.xml  : declares the root MusicXML file path
//!   - <rootfile>.xml          : the actual MusicXML content (e.g., score.xml)
//!   - (optional) other files  : images, sounds, etc.
//!
//! Exactly one score must be identifiable; an archive offering several
//! candidates is rejected rather than guessed at.

use std::io::{Cursor, Read};
use zip::ZipArchive;

use crate::config::ParseOptions;
use crate::error::{Result, ScoreError};
use crate::model::Document;
use crate::parser;

const MUSICXML_MEDIA_TYPE: &str = "application/vnd.recordare.musicxml+xml";

/// Read and parse a .mxl file from raw bytes.
pub fn parse_mxl(data: &[u8], options: &ParseOptions) -> Result<Document> {
    let xml = extract_musicxml_from_mxl(data)?;
    parser::parse_musicxml_with(&xml, options)
}

/// Extract the MusicXML content string from .mxl bytes.
pub fn extract_musicxml_from_mxl(data: &[u8]) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(data))
        .map_err(|e| ScoreError::Container(format!("Failed to open MXL archive: {e}")))?;

    let root_file_path = locate_root_file(&mut archive)?;

    let mut root_file = archive.by_name(&root_file_path).map_err(|e| {
        ScoreError::Container(format!("Root file '{root_file_path}' not found in archive: {e}"))
    })?;
    let mut xml = String::new();
    root_file
        .read_to_string(&mut xml)
        .map_err(|e| ScoreError::Container(format!("Failed to read '{root_file_path}': {e}")))?;
    Ok(xml)
}

/// Resolve the single score inside the archive, from container.xml when
/// present and from the file list otherwise.
fn locate_root_file(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String> {
    let container_xml = match archive.by_name("META-INF/container.xml") {
        Ok(mut container_file) => {
            let mut xml = String::new();
            container_file
                .read_to_string(&mut xml)
                .map_err(|e| ScoreError::Container(format!("Failed to read container.xml: {e}")))?;
            Some(xml)
        }
        Err(_) => None,
    };

    if let Some(xml) = container_xml {
        return root_file_from_container(&xml);
    }

    let names: Vec<String> = archive.file_names().map(String::from).collect();
    let candidates: Vec<&String> = names
        .iter()
        .filter(|name| {
            !name.starts_with("META-INF/") && (name.ends_with(".xml") || name.ends_with(".musicxml"))
        })
        .collect();

    match candidates.as_slice() {
        [only] => Ok((*only).clone()),
        [] => Err(ScoreError::Container(format!(
            "No MusicXML file found in archive. Files: {names:?}"
        ))),
        many => Err(ScoreError::AmbiguousContainer(format!(
            "no container.xml and {} candidate scores: {many:?}",
            many.len()
        ))),
    }
}

/// Rootfiles with a MusicXML media type (or none) are score candidates;
/// other media types (PDF renderings, audio) are ignored.
fn root_file_from_container(xml: &str) -> Result<String> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| ScoreError::Container(format!("Failed to parse container.xml: {e}")))?;

    let candidates: Vec<&str> = doc
        .descendants()
        .filter(|n| n.tag_name().name() == "rootfile")
        .filter(|n| n.attribute("media-type").map_or(true, |m| m == MUSICXML_MEDIA_TYPE))
        .filter_map(|n| n.attribute("full-path"))
        .collect();

    match candidates.as_slice() {
        [only] => Ok(only.to_string()),
        [] => Err(ScoreError::Container("No rootfile found in container.xml".to_string())),
        many => Err(ScoreError::AmbiguousContainer(format!(
            "container.xml declares {} scores: {many:?}",
            many.len()
        ))),
    }
}

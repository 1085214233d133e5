// OOXML package plumbing: the zip container, `.rels` parts and
// `[Content_Types].xml`.
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ReportError, Result};
use crate::xml::{Document, Element};

pub const REL_IMAGE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
pub const REL_SLIDE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/slide";
pub const REL_NOTES_SLIDE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/notesSlide";
pub const CT_SLIDE: &str = "application/vnd.openxmlformats-officedocument.presentationml.slide+xml";
pub const CONTENT_TYPES: &str = "[Content_Types].xml";
pub const PRESENTATION: &str = "ppt/presentation.xml";

/// Every part of a package, keyed by its zip path (no leading slash).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Package {
    parts: BTreeMap<String, Vec<u8>>,
}

impl Package {
    pub fn read_from<R: Read + Seek>(reader: R) -> Result<Self> {
        let mut archive = ZipArchive::new(reader)?;
        let mut parts = BTreeMap::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            if file.is_dir() {
                continue;
            }
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            parts.insert(file.name().to_string(), buf);
        }
        Ok(Self { parts })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            ReportError::Template(format!("cannot open {}: {}", path.display(), e))
        })?;
        Self::read_from(std::io::BufReader::new(file))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        // Content types first, as Office writes it.
        if let Some(ct) = self.parts.get(CONTENT_TYPES) {
            zip.start_file(CONTENT_TYPES, options)?;
            zip.write_all(ct)?;
        }
        for (name, bytes) in self.parts.iter().filter(|(n, _)| n.as_str() != CONTENT_TYPES) {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes)?;
        }
        Ok(zip.finish()?.into_inner())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.parts.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parts.contains_key(name)
    }

    pub fn put(&mut self, name: &str, bytes: Vec<u8>) {
        self.parts.insert(name.to_string(), bytes);
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.parts.remove(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parts.keys().map(String::as_str)
    }

    pub fn xml(&self, name: &str) -> Result<Document> {
        let bytes = self
            .get(name)
            .ok_or_else(|| ReportError::Template(format!("package has no part `{}`", name)))?;
        Document::parse(bytes)
    }

    pub fn put_xml(&mut self, name: &str, doc: &Document) -> Result<()> {
        self.put(name, doc.to_bytes()?);
        Ok(())
    }

    /// Relationships of `part`, or an empty set when it has none.
    pub fn relationships(&self, part: &str) -> Result<Relationships> {
        match self.get(&rels_name(part)) {
            Some(bytes) => Relationships::parse(bytes),
            None => Ok(Relationships::default()),
        }
    }

    pub fn put_relationships(&mut self, part: &str, rels: &Relationships) -> Result<()> {
        self.put(&rels_name(part), rels.to_bytes()?);
        Ok(())
    }
}

/// `ppt/slides/slide1.xml` -> `ppt/slides/_rels/slide1.xml.rels`.
pub fn rels_name(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolve a relationship target relative to the part that owns it.
pub fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(abs) = target.strip_prefix('/') {
        return abs.to_string();
    }
    let mut segments: Vec<&str> = source_part.split('/').collect();
    segments.pop();
    for seg in target.split('/') {
        match seg {
            ".." => {
                segments.pop();
            }
            "." | "" => {}
            other => segments.push(other),
        }
    }
    segments.join("/")
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    pub target: String,
    pub target_mode: Option<String>,
}

impl Relationship {
    pub fn is_external(&self) -> bool {
        self.target_mode.as_deref() == Some("External")
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Relationships {
    pub items: Vec<Relationship>,
}

const RELS_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";

impl Relationships {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let doc = Document::parse(bytes)?;
        let items = doc
            .root
            .elements()
            .filter(|e| e.name == "Relationship")
            .map(|e| Relationship {
                id: e.attr("Id").unwrap_or_default().to_string(),
                rel_type: e.attr("Type").unwrap_or_default().to_string(),
                target: e.attr("Target").unwrap_or_default().to_string(),
                target_mode: e.attr("TargetMode").map(str::to_string),
            })
            .collect();
        Ok(Self { items })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut root = Element::new("Relationships").with_attr("xmlns", RELS_NS);
        for rel in &self.items {
            let mut el = Element::new("Relationship")
                .with_attr("Id", &rel.id)
                .with_attr("Type", &rel.rel_type)
                .with_attr("Target", &rel.target);
            if let Some(mode) = &rel.target_mode {
                el.set_attr("TargetMode", mode);
            }
            root = root.with_child(el);
        }
        Document { root }.to_bytes()
    }

    pub fn get(&self, id: &str) -> Option<&Relationship> {
        self.items.iter().find(|r| r.id == id)
    }

    /// Smallest `rIdN` not in use.
    pub fn next_id(&self) -> String {
        let mut n = 1;
        loop {
            let id = format!("rId{}", n);
            if self.get(&id).is_none() {
                return id;
            }
            n += 1;
        }
    }

    pub fn add(&mut self, rel_type: &str, target: &str) -> String {
        let id = self.next_id();
        self.items.push(Relationship {
            id: id.clone(),
            rel_type: rel_type.to_string(),
            target: target.to_string(),
            target_mode: None,
        });
        id
    }

    pub fn retain(&mut self, f: impl FnMut(&Relationship) -> bool) {
        self.items.retain(f);
    }
}

/// Slide parts of the presentation in display order, each with the
/// relationship id `presentation.xml` refers to it by.
pub fn presentation_slides(pkg: &Package) -> Result<Vec<(String, String)>> {
    let pres = pkg.xml(PRESENTATION)?;
    let rels = pkg.relationships(PRESENTATION)?;
    let Some(list) = pres.root.child("p:sldIdLst") else {
        return Ok(Vec::new());
    };
    let mut slides = Vec::new();
    for sld in list.elements().filter(|e| e.name == "p:sldId") {
        let rid = sld
            .attr("r:id")
            .ok_or_else(|| ReportError::Template("p:sldId without r:id".into()))?;
        let rel = rels.get(rid).ok_or_else(|| {
            ReportError::Template(format!("presentation has no relationship `{}`", rid))
        })?;
        slides.push((rid.to_string(), resolve_target(PRESENTATION, &rel.target)));
    }
    Ok(slides)
}

/// Make sure `[Content_Types].xml` knows a file extension.
pub fn ensure_default_content_type(pkg: &mut Package, extension: &str, content_type: &str) -> Result<()> {
    let mut doc = pkg.xml(CONTENT_TYPES)?;
    let known = doc.root.elements().any(|e| {
        e.name == "Default"
            && e.attr("Extension")
                .map(|x| x.eq_ignore_ascii_case(extension))
                .unwrap_or(false)
    });
    if !known {
        doc.root.children.insert(
            0,
            crate::xml::Node::Element(
                Element::new("Default")
                    .with_attr("Extension", extension)
                    .with_attr("ContentType", content_type),
            ),
        );
        pkg.put_xml(CONTENT_TYPES, &doc)?;
    }
    Ok(())
}

pub fn set_override(pkg: &mut Package, part: &str, content_type: &str) -> Result<()> {
    let mut doc = pkg.xml(CONTENT_TYPES)?;
    let part_name = format!("/{}", part);
    doc.root
        .remove_where(&|e| e.name == "Override" && e.attr("PartName") == Some(part_name.as_str()));
    doc.root.children.push(crate::xml::Node::Element(
        Element::new("Override")
            .with_attr("PartName", &part_name)
            .with_attr("ContentType", content_type),
    ));
    pkg.put_xml(CONTENT_TYPES, &doc)
}

pub fn remove_override(pkg: &mut Package, part: &str) -> Result<()> {
    let mut doc = pkg.xml(CONTENT_TYPES)?;
    let part_name = format!("/{}", part);
    doc.root
        .remove_where(&|e| e.name == "Override" && e.attr("PartName") == Some(part_name.as_str()));
    pkg.put_xml(CONTENT_TYPES, &doc)
}

// Builds the output deck: a fresh copy of the template with its own slides
// removed and one slide per populated client appended in order.
use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::error::{ReportError, Result};
use crate::package::{
    ensure_default_content_type, presentation_slides, rels_name, remove_override, resolve_target,
    set_override, Package, Relationships, CT_SLIDE, PRESENTATION, REL_NOTES_SLIDE, REL_SLIDE,
};
use crate::populate::PopulatedSlide;
use crate::xml::{Element, Node};

/// Smallest id PowerPoint accepts in `p:sldId`.
const FIRST_SLIDE_ID: usize = 256;

pub fn merge_slides(template: &Package, slides: &[PopulatedSlide]) -> Result<Package> {
    if slides.is_empty() {
        return Err(ReportError::Merge("no slides to merge".into()));
    }
    build(template, slides).map_err(|e| match e {
        ReportError::Merge(_) => e,
        other => ReportError::Merge(other.to_string()),
    })
}

fn build(template: &Package, slides: &[PopulatedSlide]) -> Result<Package> {
    let mut pkg = template.clone();
    let removed = remove_template_slides(&mut pkg)?;
    debug!(removed, "template slides removed");
    ensure_default_content_type(&mut pkg, "png", "image/png")?;

    let mut pres = pkg.xml(PRESENTATION)?;
    let mut pres_rels = pkg.relationships(PRESENTATION)?;
    let mut ids = Vec::with_capacity(slides.len());

    for (i, slide) in slides.iter().enumerate() {
        let n = i + 1;
        let part = format!("ppt/slides/slide{}.xml", n);
        let mut rels = slide.rels.clone();
        rels.retain(|r| r.rel_type != REL_NOTES_SLIDE);
        for asset in &slide.media {
            let file = format!("report_{}_{}.png", n, asset.kind);
            let rel = rels
                .items
                .iter_mut()
                .find(|r| r.id == asset.rel_id)
                .ok_or_else(|| {
                    ReportError::Merge(format!(
                        "slide for `{}` has no relationship `{}`",
                        slide.client, asset.rel_id
                    ))
                })?;
            rel.target = format!("../media/{}", file);
            pkg.put(&format!("ppt/media/{}", file), asset.bytes.clone());
        }
        pkg.put_xml(&part, &slide.xml)?;
        pkg.put_relationships(&part, &rels)?;
        set_override(&mut pkg, &part, CT_SLIDE)?;
        let rid = pres_rels.add(REL_SLIDE, &format!("slides/slide{}.xml", n));
        ids.push(
            Element::new("p:sldId")
                .with_attr("id", &(FIRST_SLIDE_ID + i).to_string())
                .with_attr("r:id", &rid),
        );
        debug!(client = %slide.client, part = %part, "slide appended");
    }

    if pres.root.child("p:sldIdLst").is_none() {
        let at = pres
            .root
            .child_index("p:sldSz")
            .unwrap_or(pres.root.children.len());
        pres.root.insert_child(at, Element::new("p:sldIdLst"));
    }
    if let Some(list) = pres.root.child_mut("p:sldIdLst") {
        list.children.extend(ids.into_iter().map(Node::Element));
    }
    pkg.put_xml(PRESENTATION, &pres)?;
    pkg.put_relationships(PRESENTATION, &pres_rels)?;

    let pruned = prune_orphan_media(&mut pkg)?;
    info!(slides = slides.len(), pruned, "deck assembled");
    Ok(pkg)
}

/// Drop every slide listed in `presentation.xml`, with its relationships,
/// notes slide and content-type override.
fn remove_template_slides(pkg: &mut Package) -> Result<usize> {
    let slides = presentation_slides(pkg)?;
    let mut pres = pkg.xml(PRESENTATION)?;
    if let Some(list) = pres.root.child_mut("p:sldIdLst") {
        list.children.clear();
    }
    let ids: BTreeSet<&str> = slides.iter().map(|(rid, _)| rid.as_str()).collect();
    let mut pres_rels = pkg.relationships(PRESENTATION)?;
    pres_rels.retain(|r| !ids.contains(r.id.as_str()));

    for (_, part) in &slides {
        let rels = pkg.relationships(part)?;
        for rel in rels
            .items
            .iter()
            .filter(|r| r.rel_type == REL_NOTES_SLIDE && !r.is_external())
        {
            let notes = resolve_target(part, &rel.target);
            pkg.remove(&notes);
            pkg.remove(&rels_name(&notes));
            remove_override(pkg, &notes)?;
        }
        pkg.remove(part);
        pkg.remove(&rels_name(part));
        remove_override(pkg, part)?;
    }
    pkg.put_xml(PRESENTATION, &pres)?;
    pkg.put_relationships(PRESENTATION, &pres_rels)?;
    Ok(slides.len())
}

/// `ppt/slides/_rels/slide1.xml.rels` -> `ppt/slides/slide1.xml`.
fn rels_source(rels_part: &str) -> String {
    let (dir, file) = rels_part.rsplit_once('/').unwrap_or(("", rels_part));
    let dir = dir.strip_suffix("_rels").unwrap_or(dir).trim_end_matches('/');
    let file = file.strip_suffix(".rels").unwrap_or(file);
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{}/{}", dir, file)
    }
}

/// Remove media parts no relationship points at any more.
fn prune_orphan_media(pkg: &mut Package) -> Result<usize> {
    let mut referenced = BTreeSet::new();
    let rels_parts: Vec<String> = pkg
        .names()
        .filter(|n| n.ends_with(".rels"))
        .map(str::to_string)
        .collect();
    for rels_part in &rels_parts {
        let Some(bytes) = pkg.get(rels_part) else { continue };
        let source = rels_source(rels_part);
        for rel in Relationships::parse(bytes)?.items.iter().filter(|r| !r.is_external()) {
            referenced.insert(resolve_target(&source, &rel.target));
        }
    }
    let orphans: Vec<String> = pkg
        .names()
        .filter(|n| n.starts_with("ppt/media/") && !referenced.contains(*n))
        .map(str::to_string)
        .collect();
    for part in &orphans {
        pkg.remove(part);
        debug!(part = %part, "orphaned media pruned");
    }
    Ok(orphans.len())
}

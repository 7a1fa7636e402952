//! OAI-PMH response decoding.

use oxomo_core::{Identify, MetadataMap, ProtocolError, Record, RecordHeader, SetSpec};

use crate::xml::Element;

/// The fifteen Dublin Core elements; `oai_dc` records always carry every key.
const DC_ELEMENTS: [&str; 15] = [
    "title",
    "creator",
    "subject",
    "description",
    "publisher",
    "contributor",
    "date",
    "type",
    "format",
    "identifier",
    "source",
    "language",
    "relation",
    "coverage",
    "rights",
];

/// One page of a list response.
#[derive(Debug)]
pub(crate) struct Page<T> {
    pub items: Vec<T>,
    pub resumption_token: Option<String>,
}

/// Validate the envelope and surface `<error>` as [`ProtocolError::Oai`].
pub(crate) fn check_envelope(root: &Element) -> Result<(), ProtocolError> {
    if root.name != "OAI-PMH" {
        return Err(ProtocolError::malformed(format!(
            "expected OAI-PMH root element, found <{}>",
            root.name
        )));
    }
    if let Some(error) = root.child("error") {
        let code = error.attr("code").unwrap_or("unknown");
        return Err(ProtocolError::oai(code, error.text.clone()));
    }
    Ok(())
}

pub(crate) fn identify(root: &Element) -> Result<Identify, ProtocolError> {
    let body = verb_body(root, "Identify")?;
    Ok(Identify {
        repository_name: body.child_text("repositoryName").to_string(),
        admin_emails: body
            .children_named("adminEmail")
            .map(|e| e.text.clone())
            .collect(),
        base_url: body.child_text("baseURL").to_string(),
        protocol_version: body.child_text("protocolVersion").to_string(),
        earliest_datestamp: body.child_text("earliestDatestamp").to_string(),
        granularity: body.child_text("granularity").to_string(),
    })
}

pub(crate) fn list_identifiers(root: &Element) -> Result<Page<RecordHeader>, ProtocolError> {
    let body = verb_body(root, "ListIdentifiers")?;
    let items = body
        .children_named("header")
        .map(header)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page {
        items,
        resumption_token: resumption_token(body),
    })
}

pub(crate) fn list_sets(root: &Element) -> Result<Page<SetSpec>, ProtocolError> {
    let body = verb_body(root, "ListSets")?;
    let items = body
        .children_named("set")
        .map(|set| SetSpec {
            spec: set.child_text("setSpec").to_string(),
            name: set.child_text("setName").to_string(),
        })
        .filter(|set| !set.spec.is_empty())
        .collect();
    Ok(Page {
        items,
        resumption_token: resumption_token(body),
    })
}

pub(crate) fn get_record(
    root: &Element,
    metadata_prefix: &str,
) -> Result<Record, ProtocolError> {
    let body = verb_body(root, "GetRecord")?;
    let record = body
        .child("record")
        .ok_or_else(|| ProtocolError::malformed("GetRecord without <record>"))?;
    let header = header(
        record
            .child("header")
            .ok_or_else(|| ProtocolError::malformed("record without <header>"))?,
    )?;

    let mut metadata = MetadataMap::new();
    if header.is_deleted() {
        return Ok(Record { header, metadata });
    }
    if metadata_prefix == "oai_dc" {
        for element in DC_ELEMENTS {
            metadata.insert(element.to_string(), Vec::new());
        }
    }
    if let Some(format) = record.child("metadata").and_then(|m| m.children.first()) {
        for element in &format.children {
            if element.text.is_empty() {
                continue;
            }
            metadata
                .entry(element.name.clone())
                .or_default()
                .push(element.text.clone());
        }
    }
    Ok(Record { header, metadata })
}

fn header(element: &Element) -> Result<RecordHeader, ProtocolError> {
    let identifier = element.child_text("identifier");
    if identifier.is_empty() {
        return Err(ProtocolError::malformed("header without <identifier>"));
    }
    Ok(RecordHeader {
        identifier: identifier.to_string(),
        datestamp: element.child_text("datestamp").to_string(),
        set_specs: element
            .children_named("setSpec")
            .map(|e| e.text.clone())
            .collect(),
        deleted: element.attr("status") == Some("deleted"),
    })
}

fn verb_body<'a>(root: &'a Element, verb: &str) -> Result<&'a Element, ProtocolError> {
    root.child(verb)
        .ok_or_else(|| ProtocolError::malformed(format!("response has no <{verb}> element")))
}

fn resumption_token(body: &Element) -> Option<String> {
    body.child("resumptionToken")
        .map(|t| t.text.clone())
        .filter(|t| !t.is_empty())
}

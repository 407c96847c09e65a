//! # manifest.rs
//!
//! Structured builders for the two generated submission documents:
//! - `submission.xml`, the submission manifest, built as an `XmlElement` tree
//!   and serialized with `quick-xml`;
//! - `<sample>.sbt`, the author template, built as an `AsnValue` tree and
//!   serialized as ASN.1 value notation.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::config::SubmissionSettings;
use crate::metadata::{AUTHORS, MetadataRow, PUBLICATION_PMID, PUBLICATION_TITLE};

pub const SUBMISSION_ZIP: &str = "submission.zip";

///MARK: XML manifest
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(name: &str) -> Self {
        XmlElement {
            name: name.to_string(),
            attributes: Vec::new(),
            text: None,
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn child(mut self, child: XmlElement) -> Self {
        self.children.push(child);
        self
    }

    #[cfg(test)]
    fn find(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    fn write_to<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        if self.text.is_none() && self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }
        writer.write_event(Event::Start(start))?;
        if let Some(text) = &self.text {
            writer.write_event(Event::Text(BytesText::new(text)))?;
        }
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }

    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 3);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        self.write_to(&mut writer)?;
        let mut xml = String::from_utf8(writer.into_inner())?;
        xml.push('\n');
        Ok(xml)
    }
}

/// SPUID of a sample submission: `<yyyy-mm-dd>.<sample-id>`.
pub fn submission_identifier(date: NaiveDate, sample_id: &str) -> String {
    format!("{}.{}", date.format("%Y-%m-%d"), sample_id)
}

pub fn submission_manifest(
    settings: &SubmissionSettings,
    sample_id: &str,
    date: NaiveDate,
) -> XmlElement {
    let description = XmlElement::new("Description")
        .child(
            XmlElement::new("Comment")
                .text(&format!("{}:{}", settings.comment_prefix, sample_id)),
        )
        .child(
            XmlElement::new("Organization")
                .attr("type", "center")
                .attr("role", "owner")
                .child(XmlElement::new("Name").text(&settings.organization)),
        );

    let add_files = XmlElement::new("AddFiles")
        .attr("target_db", &settings.target_db)
        .child(
            XmlElement::new("File")
                .attr("file_path", SUBMISSION_ZIP)
                .child(XmlElement::new("DataType").text("genbank-submission-package")),
        )
        .child(
            XmlElement::new("Attribute")
                .attr("name", "wizard")
                .text(&settings.wizard),
        )
        .child(XmlElement::new("Status").child(XmlElement::new("Release")))
        .child(
            XmlElement::new("Identifier").child(
                XmlElement::new("SPUID")
                    .attr("spuid_namespace", &settings.spuid_namespace)
                    .text(&submission_identifier(date, sample_id)),
            ),
        );

    XmlElement::new("Submission")
        .child(description)
        .child(XmlElement::new("Action").child(add_files))
}

pub fn write_submission_manifest(
    path: &Path,
    settings: &SubmissionSettings,
    sample_id: &str,
    date: NaiveDate,
) -> Result<()> {
    let xml = submission_manifest(settings, sample_id, date).to_xml_string()?;
    std::fs::write(path, xml)
        .with_context(|| format!("Could not write manifest {}", path.display()))
}

///MARK: ASN.1 author template
#[derive(Debug, Clone, PartialEq)]
pub enum AsnValue {
    /// Quoted string.
    Str(String),
    /// Bare word or number.
    Word(String),
    /// `{ label value, ... }`
    Struct(Vec<(String, AsnValue)>),
    /// `{ value, ... }`
    Set(Vec<AsnValue>),
    /// `tag value`
    Choice(String, Box<AsnValue>),
}

impl AsnValue {
    pub fn str(value: &str) -> Self {
        AsnValue::Str(value.to_string())
    }

    pub fn word(value: &str) -> Self {
        AsnValue::Word(value.to_string())
    }

    pub fn choice(tag: &str, value: AsnValue) -> Self {
        AsnValue::Choice(tag.to_string(), Box::new(value))
    }

    pub fn fields(fields: Vec<(&str, AsnValue)>) -> Self {
        AsnValue::Struct(
            fields
                .into_iter()
                .map(|(label, value)| (label.to_string(), value))
                .collect(),
        )
    }

    fn render(&self, indent: usize, out: &mut String) {
        let pad = "  ".repeat(indent + 1);
        match self {
            AsnValue::Str(s) => {
                out.push('"');
                out.push_str(&s.replace('"', "\"\""));
                out.push('"');
            }
            AsnValue::Word(w) => out.push_str(w),
            AsnValue::Choice(tag, value) => {
                out.push_str(tag);
                out.push(' ');
                value.render(indent, out);
            }
            AsnValue::Struct(fields) if fields.is_empty() => out.push_str("{ }"),
            AsnValue::Set(items) if items.is_empty() => out.push_str("{ }"),
            AsnValue::Struct(fields) => {
                out.push_str("{\n");
                for (i, (label, value)) in fields.iter().enumerate() {
                    out.push_str(&pad);
                    out.push_str(label);
                    out.push(' ');
                    value.render(indent + 1, out);
                    out.push_str(if i + 1 < fields.len() { ",\n" } else { "\n" });
                }
                out.push_str(&"  ".repeat(indent));
                out.push('}');
            }
            AsnValue::Set(items) => {
                out.push_str("{\n");
                for (i, value) in items.iter().enumerate() {
                    out.push_str(&pad);
                    value.render(indent + 1, out);
                    out.push_str(if i + 1 < items.len() { ",\n" } else { "\n" });
                }
                out.push_str(&"  ".repeat(indent));
                out.push('}');
            }
        }
    }
}

/// Sequence of `Type ::= value` definitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AsnDocument {
    pub definitions: Vec<(String, AsnValue)>,
}

impl AsnDocument {
    pub fn define(mut self, type_name: &str, value: AsnValue) -> Self {
        self.definitions.push((type_name.to_string(), value));
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (type_name, value) in &self.definitions {
            out.push_str(type_name);
            out.push_str(" ::= ");
            value.render(0, &mut out);
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorName {
    pub first: String,
    pub middle: String,
    pub last: String,
}

impl AuthorName {
    /// Parses `First [Middle ...] Last`; a middle initial is kept only when the
    /// name has three or more parts.
    pub fn parse(name: &str) -> Option<AuthorName> {
        let parts: Vec<&str> = name.split_whitespace().collect();
        let first = parts.first()?;
        let last = parts.last()?;
        let middle = if parts.len() > 2 {
            parts[1]
                .chars()
                .next()
                .map(|c| format!("{}.", c))
                .unwrap_or_default()
        } else {
            String::new()
        };
        Some(AuthorName {
            first: first.to_string(),
            middle,
            last: last.to_string(),
        })
    }

    fn to_asn(&self) -> AsnValue {
        AsnValue::fields(vec![(
            "name",
            AsnValue::choice(
                "name",
                AsnValue::fields(vec![
                    ("last", AsnValue::str(&self.last)),
                    ("first", AsnValue::str(&self.first)),
                    ("middle", AsnValue::str(&self.middle)),
                ]),
            ),
        )])
    }
}

/// Comma-separated author list from the `Authors` metadata column.
pub fn parse_authors(authors: &str) -> Vec<AuthorName> {
    authors.split(',').filter_map(AuthorName::parse).collect()
}

/// Submitter identity taken from the job descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitter {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub affiliation: Option<String>,
    pub consortium: Option<String>,
}

impl Submitter {
    fn author_name(&self) -> AuthorName {
        AuthorName {
            first: self.first_name.clone(),
            middle: String::new(),
            last: self.last_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    Unpublished {
        authors: Vec<AuthorName>,
        consortium: Option<String>,
    },
    Pmid(String),
    Unspecified,
}

impl Publication {
    pub fn from_metadata(row: &MetadataRow, submitter: &Submitter) -> Publication {
        let title = row.value(PUBLICATION_TITLE).trim();
        if title.is_empty() || title == "NA" || title.eq_ignore_ascii_case("unpublished") {
            let mut authors = parse_authors(row.value(AUTHORS));
            if authors.is_empty() && submitter.consortium.is_none() {
                authors.push(submitter.author_name());
            }
            Publication::Unpublished {
                authors,
                consortium: submitter.consortium.clone(),
            }
        } else {
            match row.value(PUBLICATION_PMID).trim() {
                "" => Publication::Unspecified,
                pmid => Publication::Pmid(pmid.to_string()),
            }
        }
    }
}

pub fn submit_block(
    submitter: &Submitter,
    publication: &Publication,
    settings: &SubmissionSettings,
) -> AsnDocument {
    let mut contact_affil = Vec::new();
    if let Some(affiliation) = &submitter.affiliation {
        contact_affil.push(("affil", AsnValue::str(affiliation)));
    }
    if !submitter.email.is_empty() {
        contact_affil.push(("email", AsnValue::str(&submitter.email)));
    }
    let mut contact = vec![(
        "name",
        AsnValue::choice(
            "name",
            AsnValue::fields(vec![
                ("last", AsnValue::str(&submitter.last_name)),
                ("first", AsnValue::str(&submitter.first_name)),
            ]),
        ),
    )];
    if !contact_affil.is_empty() {
        contact.push(("affil", AsnValue::choice("std", AsnValue::fields(contact_affil))));
    }

    let mut cit_authors = vec![(
        "names",
        AsnValue::choice("std", AsnValue::Set(vec![submitter.author_name().to_asn()])),
    )];
    if let Some(affiliation) = &submitter.affiliation {
        cit_authors.push((
            "affil",
            AsnValue::choice("std", AsnValue::fields(vec![("affil", AsnValue::str(affiliation))])),
        ));
    }

    let block = AsnValue::fields(vec![
        (
            "contact",
            AsnValue::fields(vec![("contact", AsnValue::fields(contact))]),
        ),
        (
            "cit",
            AsnValue::fields(vec![("authors", AsnValue::fields(cit_authors))]),
        ),
        ("subtype", AsnValue::word("new")),
    ]);

    let document = AsnDocument::default().define("Submit-block", block);

    let publication = match publication {
        Publication::Unpublished {
            authors,
            consortium,
        } => {
            let mut names: Vec<AsnValue> = authors.iter().map(AuthorName::to_asn).collect();
            if let Some(consortium) = consortium {
                names.push(AsnValue::fields(vec![(
                    "name",
                    AsnValue::choice("consortium", AsnValue::str(consortium)),
                )]));
            }
            Some(AsnValue::choice(
                "gen",
                AsnValue::fields(vec![
                    ("cit", AsnValue::str("unpublished")),
                    (
                        "authors",
                        AsnValue::fields(vec![(
                            "names",
                            AsnValue::choice("std", AsnValue::Set(names)),
                        )]),
                    ),
                    ("title", AsnValue::str(&settings.direct_submission_title)),
                ]),
            ))
        }
        Publication::Pmid(pmid) => Some(AsnValue::choice("pmid", AsnValue::word(pmid))),
        Publication::Unspecified => None,
    };

    match publication {
        Some(publication) => document.define(
            "Seqdesc",
            AsnValue::choice(
                "pub",
                AsnValue::fields(vec![("pub", AsnValue::Set(vec![publication]))]),
            ),
        ),
        None => document,
    }
}

pub fn write_submit_block(
    path: &Path,
    submitter: &Submitter,
    publication: &Publication,
    settings: &SubmissionSettings,
) -> Result<()> {
    let text = submit_block(submitter, publication, settings).render();
    std::fs::write(path, text)
        .with_context(|| format!("Could not write author template {}", path.display()))
}

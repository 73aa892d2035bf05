use crate::error::ProtocolError;
use crate::uid::Uid;

/// One service slot inside a component's directory entry. `NoService` is an
/// explicit hole so port numbers stay stable across re-advertisements (spec
/// §3 "Directory entry").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceSlot {
    NoService,
    Multicast(String),
    E2e(String),
}

/// A single component's parsed directory entry, plus the exact raw bytes it
/// was parsed from (sans the NUL terminator) so callers can test
/// byte-identity against a previously cached copy without re-encoding (spec
/// §4.4 "ProcessDE").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDe {
    pub uid: Uid,
    pub app_name: String,
    pub component_type: String,
    pub services: Vec<ServiceSlot>,
    pub raw: Vec<u8>,
}

/// Parse a DE stream: a concatenation of zero-terminated per-component
/// documents (spec §4.4). Each document has the grammar
/// `<c><u>UID</u><n>app</n><t>type</t>(<m>name</m>|<e>name</e>|<x></x>)*</c>`.
pub fn parse_directory_entries(bytes: &[u8]) -> Result<Vec<ComponentDe>, ProtocolError> {
    let mut out = Vec::new();
    for chunk in bytes.split(|&b| b == 0) {
        if chunk.is_empty() {
            continue;
        }
        out.push(parse_one(chunk)?);
    }
    Ok(out)
}

fn parse_one(chunk: &[u8]) -> Result<ComponentDe, ProtocolError> {
    let text = std::str::from_utf8(chunk)
        .map_err(|_| ProtocolError::BadDirectoryEntry("component not UTF-8"))?;
    let text = text
        .strip_prefix("<c>")
        .ok_or(ProtocolError::BadDirectoryEntry("missing <c> open tag"))?;
    let text = text
        .strip_suffix("</c>")
        .ok_or(ProtocolError::BadDirectoryEntry("missing </c> close tag"))?;

    let mut rest = text;
    let uid_text = take_tag(&mut rest, "u")?;
    let uid: Uid = uid_text
        .parse()
        .map_err(|_| ProtocolError::BadDirectoryEntry("bad uid in <u> tag"))?;
    let app_name = take_tag(&mut rest, "n")?.to_owned();
    let component_type = take_tag(&mut rest, "t")?.to_owned();

    let mut services = Vec::new();
    while !rest.is_empty() {
        if let Some(body) = strip_tag(&mut rest, "m") {
            services.push(ServiceSlot::Multicast(body.to_owned()));
        } else if let Some(body) = strip_tag(&mut rest, "e") {
            services.push(ServiceSlot::E2e(body.to_owned()));
        } else if strip_tag(&mut rest, "x").is_some() {
            services.push(ServiceSlot::NoService);
        } else {
            return Err(ProtocolError::BadDirectoryEntry("unrecognized service tag"));
        }
    }

    Ok(ComponentDe {
        uid,
        app_name,
        component_type,
        services,
        raw: chunk.to_vec(),
    })
}

/// Extract `<tag>body</tag>` from the front of `rest`, advancing past it.
fn take_tag<'a>(rest: &mut &'a str, tag: &str) -> Result<&'a str, ProtocolError> {
    strip_tag(rest, tag).ok_or(ProtocolError::BadDirectoryEntry("expected tag not found"))
}

fn strip_tag<'a>(rest: &mut &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let body = rest.strip_prefix(open.as_str())?;
    let end = body.find(close.as_str())?;
    let (value, after) = body.split_at(end);
    *rest = &after[close.len()..];
    Some(value)
}

/// Encode one component into its NUL-terminated wire form.
#[must_use]
pub fn write_directory_entry(de: &ComponentDe) -> Vec<u8> {
    let mut s = String::new();
    s.push_str("<c>");
    s.push_str(&format!("<u>{}</u>", de.uid));
    s.push_str(&format!("<n>{}</n>", de.app_name));
    s.push_str(&format!("<t>{}</t>", de.component_type));
    for slot in &de.services {
        match slot {
            ServiceSlot::Multicast(name) => s.push_str(&format!("<m>{name}</m>")),
            ServiceSlot::E2e(name) => s.push_str(&format!("<e>{name}</e>")),
            ServiceSlot::NoService => s.push_str("<x></x>"),
        }
    }
    s.push_str("</c>");
    let mut bytes = s.into_bytes();
    bytes.push(0);
    bytes
}

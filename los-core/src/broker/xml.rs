//! Parsers for the broker's XML payloads.

use quick_xml::Reader;
use quick_xml::events::Event;

use super::BrokerError;

/// Extract all `id` attributes from a `<request id="N">` listing.
pub(crate) fn parse_request_ids(xml: &str) -> Result<Vec<u32>, BrokerError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut ids = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(element) | Event::Empty(element))
                if element.local_name().as_ref() == b"request" =>
            {
                for attribute in element.attributes() {
                    let attribute = attribute.map_err(malformed)?;
                    if attribute.key.local_name().as_ref() == b"id" {
                        let value = attribute.unescape_value().map_err(malformed)?;
                        ids.push(value.parse().map_err(malformed)?);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(malformed(err)),
        }
    }
    Ok(ids)
}

/// Count completed and total nodes in a request status document.
///
/// A node counts as completed when its `<node>` entry carries a non-empty
/// `completed` attribute or a non-empty `<completed>` child element.
pub(crate) fn parse_node_completion(xml: &str) -> Result<(u32, u32), BrokerError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut total = 0u32;
    let mut completed = 0u32;
    let mut node_completed = false;
    let mut in_node = false;
    let mut in_completed_marker = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) if element.local_name().as_ref() == b"node" => {
                in_node = true;
                node_completed = has_completed_attribute(&element)?;
            }
            Ok(Event::Empty(element)) if element.local_name().as_ref() == b"node" => {
                total += 1;
                if has_completed_attribute(&element)? {
                    completed += 1;
                }
            }
            Ok(Event::Start(element))
                if in_node && element.local_name().as_ref() == b"completed" =>
            {
                in_completed_marker = true;
            }
            Ok(Event::Text(text)) if in_completed_marker => {
                if !text.unescape().map_err(malformed)?.trim().is_empty() {
                    node_completed = true;
                }
            }
            Ok(Event::End(element)) if element.local_name().as_ref() == b"completed" => {
                in_completed_marker = false;
            }
            Ok(Event::End(element)) if element.local_name().as_ref() == b"node" => {
                in_node = false;
                total += 1;
                if node_completed {
                    completed += 1;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => return Err(malformed(err)),
        }
    }
    Ok((completed, total))
}

fn has_completed_attribute(
    element: &quick_xml::events::BytesStart<'_>,
) -> Result<bool, BrokerError> {
    for attribute in element.attributes() {
        let attribute = attribute.map_err(malformed)?;
        if attribute.key.local_name().as_ref() == b"completed" {
            let value = attribute.unescape_value().map_err(malformed)?;
            return Ok(!value.trim().is_empty());
        }
    }
    Ok(false)
}

fn malformed(err: impl std::fmt::Display) -> BrokerError {
    BrokerError::Malformed(err.to_string())
}

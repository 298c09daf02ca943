//! Schematic file reader
//!
//! Reads xschem `.sch` files into wires and component placements so a host
//! can lay the circuit out next to its simulation. Line-oriented records:
//! `v {…}` carries the file version, `N x1 y1 x2 y2 {lab=…}` a wire, and
//! `C {symbol} x y rot mirror {attrs}` a component, whose attribute block
//! may span several physical lines until the braces balance. Other record
//! types are skipped.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::Result;

/// A wire segment between two schematic coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Wire {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub label: String,
}

/// Coarse component classification derived from the symbol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Pmos,
    Nmos,
    InputPin,
    OutputPin,
    Label,
    Resistor,
    Capacitor,
    Unknown,
}

/// A placed component with its raw attribute block.
#[derive(Debug, Clone)]
pub struct Component {
    pub symbol: String,
    pub x: f64,
    pub y: f64,
    pub rotation: i32,
    pub mirror: i32,
    pub attributes: HashMap<String, String>,
    pub name: String,
    pub label: String,
    pub kind: ComponentKind,
}

/// Parsed schematic contents.
#[derive(Debug, Clone, Default)]
pub struct Schematic {
    pub version: String,
    pub wires: Vec<Wire>,
    pub components: Vec<Component>,
}

/// Classify a symbol path into a component kind.
pub fn classify_symbol(symbol: &str) -> ComponentKind {
    let lower = symbol.to_ascii_lowercase();
    if lower.contains("pfet") || lower.contains("pmos") {
        ComponentKind::Pmos
    } else if lower.contains("nfet") || lower.contains("nmos") {
        ComponentKind::Nmos
    } else if lower.contains("ipin") {
        ComponentKind::InputPin
    } else if lower.contains("opin") {
        ComponentKind::OutputPin
    } else if lower.contains("lab_pin") {
        ComponentKind::Label
    } else if lower.contains("res") {
        ComponentKind::Resistor
    } else if lower.contains("cap") {
        ComponentKind::Capacitor
    } else {
        ComponentKind::Unknown
    }
}

/// Content of the outermost `{…}` pair, or the text itself if none.
fn extract_braces(text: &str) -> &str {
    let Some(start) = text.find('{') else {
        return text;
    };
    match text.rfind('}') {
        Some(end) if end > start => &text[start + 1..end],
        _ => &text[start + 1..],
    }
}

fn has_complete_braces(text: &str) -> bool {
    let open = text.matches('{').count();
    let close = text.matches('}').count();
    open == close
}

/// Parse a `key=value key=value` attribute block (whitespace separated,
/// newlines allowed).
fn parse_attributes(attrs: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for part in attrs.split_whitespace() {
        if let Some((key, value)) = part.split_once('=') {
            out.insert(key.to_string(), value.to_string());
        }
    }
    out
}

fn parse_wire(line: &str) -> Option<Wire> {
    let mut tokens = line.split_whitespace().skip(1);
    let x1: f64 = tokens.next()?.parse().ok()?;
    let y1: f64 = tokens.next()?.parse().ok()?;
    let x2: f64 = tokens.next()?.parse().ok()?;
    let y2: f64 = tokens.next()?.parse().ok()?;

    let label = line
        .find('{')
        .map(|start| parse_attributes(extract_braces(&line[start..])))
        .and_then(|attrs| attrs.get("lab").cloned())
        .unwrap_or_default();

    Some(Wire { x1, y1, x2, y2, label })
}

fn parse_component(accumulated: &str) -> Option<Component> {
    let symbol_start = accumulated.find('{')?;
    let symbol_end = accumulated[symbol_start..].find('}')? + symbol_start;
    let symbol = accumulated[symbol_start + 1..symbol_end].to_string();

    let after_symbol = accumulated[symbol_end + 1..].trim();
    let mut tokens = after_symbol.split_whitespace();
    let x: f64 = tokens.next()?.parse().ok()?;
    let y: f64 = tokens.next()?.parse().ok()?;
    let rotation: i32 = tokens.next()?.parse().ok()?;
    let mirror: i32 = tokens.next()?.parse().ok()?;

    let attributes = after_symbol
        .find('{')
        .map(|start| parse_attributes(extract_braces(&after_symbol[start..])))
        .unwrap_or_default();

    let name = attributes.get("name").cloned().unwrap_or_default();
    let label = attributes.get("lab").cloned().unwrap_or_default();
    let kind = classify_symbol(&symbol);

    Some(Component {
        symbol,
        x,
        y,
        rotation,
        mirror,
        attributes,
        name,
        label,
        kind,
    })
}

/// Parse schematic text.
pub fn parse_sch(content: &str) -> Schematic {
    let lines: Vec<&str> = content.lines().collect();
    let mut schematic = Schematic::default();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();

        if line.starts_with("v {") {
            schematic.version = extract_braces(line).to_string();
        } else if line.starts_with("N ") {
            if let Some(wire) = parse_wire(line) {
                schematic.wires.push(wire);
            }
        } else if line.starts_with("C {") {
            // The attribute block may continue onto following lines.
            let mut record = line.to_string();
            while !has_complete_braces(&record) && i + 1 < lines.len() {
                i += 1;
                record.push('\n');
                record.push_str(lines[i]);
            }
            if let Some(component) = parse_component(&record) {
                schematic.components.push(component);
            }
        }

        i += 1;
    }

    schematic
}

/// Read and parse a schematic file.
pub fn parse_sch_file(path: &Path) -> Result<Schematic> {
    let content = fs::read_to_string(path)?;
    Ok(parse_sch(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCH: &str = "v {xschem version=3.4.6 file_version=1.2}\n\
        G {}\n\
        N 100 -200 300 -200 {lab=out}\n\
        C {sky130_fd_pr/nfet_01v8.sym} 120 -80 0 0 {name=M1\n\
        L=0.15\n\
        W=1}\n\
        C {devices/ipin.sym} 0 -200 0 0 {name=p1 lab=in}\n";

    #[test]
    fn version_and_wires_parse() {
        let sch = parse_sch(SCH);
        assert_eq!(sch.version, "xschem version=3.4.6 file_version=1.2");
        assert_eq!(
            sch.wires,
            vec![Wire {
                x1: 100.0,
                y1: -200.0,
                x2: 300.0,
                y2: -200.0,
                label: "out".to_string(),
            }]
        );
    }

    #[test]
    fn multi_line_component_accumulates_until_braces_balance() {
        let sch = parse_sch(SCH);
        assert_eq!(sch.components.len(), 2);

        let m1 = &sch.components[0];
        assert_eq!(m1.name, "M1");
        assert_eq!(m1.kind, ComponentKind::Nmos);
        assert_eq!(m1.attributes.get("W").map(String::as_str), Some("1"));

        let pin = &sch.components[1];
        assert_eq!(pin.kind, ComponentKind::InputPin);
        assert_eq!(pin.label, "in");
    }

    #[test]
    fn malformed_records_are_skipped() {
        let sch = parse_sch("N 1 2\nC {sym} not numbers\n");
        assert!(sch.wires.is_empty());
        assert!(sch.components.is_empty());
    }

    #[test]
    fn symbols_classify_by_name() {
        assert_eq!(classify_symbol("sky130_fd_pr/pfet_01v8.sym"), ComponentKind::Pmos);
        assert_eq!(classify_symbol("devices/lab_pin.sym"), ComponentKind::Label);
        assert_eq!(classify_symbol("devices/capa.sym"), ComponentKind::Capacitor);
        assert_eq!(classify_symbol("devices/vsource.sym"), ComponentKind::Unknown);
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Streaming parse of a single `nmap -oX` XML document into findings, one
//! per `<port>` element. Walks `StartElement`/`EndElement` events and
//! accumulates state for the element currently open.

use std::collections::HashMap;

use scan_common::plugin::Finding;
use xml::{attribute::OwnedAttribute, reader::XmlEvent, EventReader};

fn attr<'a>(attrs: &'a [OwnedAttribute], name: &str) -> Option<&'a str> {
    attrs.iter().find(|a| a.name.local_name == name).map(|a| a.value.as_str())
}

pub fn parse_xml(xml: &str, source_label: &str) -> Result<Vec<Finding>, String> {
    let mut reader = EventReader::new(xml.as_bytes());

    let mut ip: Option<String> = None;
    let mut fqdn: Option<String> = None;
    let mut os_name: Option<String> = None;

    let mut in_port = false;
    let mut current: HashMap<String, String> = HashMap::new();
    let mut script_outputs: Vec<String> = Vec::new();
    let mut findings = Vec::new();

    loop {
        let event = reader.next().map_err(|e| e.to_string())?;
        match event {
            XmlEvent::StartElement { name, attributes, .. } => match name.local_name.as_str() {
                "address" if attr(&attributes, "addrtype") == Some("ipv4") => {
                    ip = attr(&attributes, "addr").map(str::to_string);
                }
                "hostname" => {
                    fqdn = attr(&attributes, "name").map(str::to_string);
                }
                "osmatch" => {
                    os_name = attr(&attributes, "name").map(str::to_string);
                }
                "port" => {
                    in_port = true;
                    current.clear();
                    script_outputs.clear();
                    if let Some(id) = attr(&attributes, "portid") {
                        current.insert("port".to_string(), id.to_string());
                    }
                    current.insert(
                        "protocol".to_string(),
                        attr(&attributes, "protocol").unwrap_or("-").to_string(),
                    );
                }
                "state" if in_port => {
                    current.insert("state".to_string(), attr(&attributes, "state").unwrap_or("-").to_string());
                    current.insert("reason".to_string(), attr(&attributes, "reason").unwrap_or("-").to_string());
                }
                "service" if in_port => {
                    current.insert(
                        "service_name".to_string(),
                        attr(&attributes, "name").unwrap_or("-").to_string(),
                    );
                    current.insert("product".to_string(), attr(&attributes, "product").unwrap_or("-").to_string());
                    current.insert("version".to_string(), attr(&attributes, "version").unwrap_or("-").to_string());
                    current.insert("extra".to_string(), attr(&attributes, "extrainfo").unwrap_or("-").to_string());
                }
                "script" if in_port => {
                    if let Some(output) = attr(&attributes, "output") {
                        script_outputs.push(output.to_string());
                    }
                }
                _ => {}
            },
            XmlEvent::EndElement { name } => {
                if name.local_name == "port" && in_port {
                    current.entry("cpe".to_string()).or_insert_with(|| "-".to_string());
                    let raw_output = if script_outputs.is_empty() {
                        "-".to_string()
                    } else {
                        script_outputs.join("; ")
                    };
                    current.insert(
                        "script_output".to_string(),
                        crate::format_script_output(&raw_output),
                    );
                    current.insert("source".to_string(), source_label.to_string());
                    if let Some(ip) = &ip {
                        current.insert("ip".to_string(), ip.clone());
                    }
                    if let Some(fqdn) = &fqdn {
                        current.insert("fqdn".to_string(), fqdn.clone());
                    }
                    if let Some(os_name) = &os_name {
                        current.insert("os".to_string(), os_name.clone());
                    }

                    let port = current.get("port").and_then(|p| p.parse::<i32>().ok());
                    let protocol = current.get("protocol").cloned();
                    let service_name = current.get("service_name").cloned();
                    let state = current.get("state").cloned();

                    findings.push(Finding {
                        port,
                        protocol,
                        service_name,
                        state,
                        fields: std::mem::take(&mut current),
                    });
                    in_port = false;
                }
            }
            XmlEvent::EndDocument => break,
            _ => {}
        }
    }

    Ok(findings)
}

//! Proxy manifest: the `[[proxies]]` tables of an frpc.toml file.

use crate::protocol::Protocol;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxyDefinition {
    pub name: String,
    /// `None` if the proxy type is empty or not TCP/UDP
    pub protocol: Option<Protocol>,
    pub local_port: u16,
    pub remote_port: u16,
}

impl ProxyDefinition {
    /// Only valid definitions can be matched against security group rules.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && self.protocol.is_some() && self.remote_port != 0
    }
}

#[derive(Debug, Deserialize)]
struct FrpcFile {
    #[serde(default)]
    proxies: Vec<FrpcProxy>,
}

#[derive(Debug, Deserialize)]
struct FrpcProxy {
    #[serde(default)]
    name: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default, rename = "localPort")]
    local_port: Option<toml::Value>,
    #[serde(default, rename = "remotePort")]
    remote_port: Option<toml::Value>,
}

/// Missing ports are 0. Ports that are not integers in `0..=65535` are also 0, with a warning,
/// which makes the whole entry invalid.
fn port(proxy_name: &str, field: &str, value: Option<&toml::Value>) -> u16 {
    let Some(value) = value else {
        return 0;
    };

    match value.as_integer().map(u16::try_from) {
        Some(Ok(port)) => port,
        _ => {
            log::warn!(
                "Proxy '{}' has invalid {} {}, ignoring it",
                proxy_name,
                field,
                value
            );
            0
        }
    }
}

pub fn parse_file(file_path: &Path) -> anyhow::Result<Vec<ProxyDefinition>> {
    let input = std::fs::read_to_string(file_path)?;
    parse_input(&input)
}

fn parse_input(input: &str) -> anyhow::Result<Vec<ProxyDefinition>> {
    let file: FrpcFile = toml::from_str(input).context("Invalid frpc.toml")?;

    let mut seen = HashSet::new();
    let proxies = file
        .proxies
        .into_iter()
        .map(|proxy| {
            let protocol = Protocol::parse(&proxy.kind);
            if protocol.is_none() && !proxy.kind.is_empty() {
                log::warn!(
                    "Proxy '{}' has type '{}', only tcp and udp proxies can be managed",
                    proxy.name,
                    proxy.kind
                );
            }

            if !proxy.name.is_empty() && !seen.insert(proxy.name.clone()) {
                log::warn!(
                    "Proxy name '{}' appears more than once, its rules cannot be told apart",
                    proxy.name
                );
            }

            let local_port = port(&proxy.name, "localPort", proxy.local_port.as_ref());
            let remote_port = port(&proxy.name, "remotePort", proxy.remote_port.as_ref());

            ProxyDefinition {
                name: proxy.name,
                protocol,
                local_port,
                remote_port,
            }
        })
        .collect::<Vec<_>>();

    log::debug!("Manifest declares {} proxies", proxies.len());

    Ok(proxies)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(input: &str) -> Vec<ProxyDefinition> {
        parse_input(input).unwrap()
    }

    fn proxy(name: &str, protocol: Option<Protocol>, local: u16, remote: u16) -> ProxyDefinition {
        ProxyDefinition {
            name: name.to_string(),
            protocol,
            local_port: local,
            remote_port: remote,
        }
    }

    #[test]
    fn exhaustive_example() {
        let input = r#"
serverAddr = "frp.example.com"
serverPort = 7000
auth.token = "secret"

[[proxies]]
name = "ssh"
type = "tcp"
localIP = "127.0.0.1"
localPort = 22
remotePort = 6000

[[proxies]]
name = "stun"
type = "UDP"
localPort = 3478
remotePort = 3478
transport.bandwidthLimit = "1MB"

[[proxies]]
name = "blog"
type = "http"
localPort = 8080
customDomains = ["blog.example.com"]

[[proxies]]
name = "broken"
localPort = 1
remotePort = 2
"#;

        assert_eq!(
            parse(input),
            vec![
                proxy("ssh", Some(Protocol::Tcp), 22, 6000),
                proxy("stun", Some(Protocol::Udp), 3478, 3478),
                proxy("blog", None, 8080, 0),
                proxy("broken", None, 1, 2),
            ]
        );
    }

    #[test]
    fn validity() {
        assert!(proxy("ssh", Some(Protocol::Tcp), 22, 6000).is_valid());
        assert!(!proxy("", Some(Protocol::Tcp), 22, 6000).is_valid());
        assert!(!proxy("ssh", None, 22, 6000).is_valid());
        assert!(!proxy("ssh", Some(Protocol::Tcp), 22, 0).is_valid());
    }

    #[test]
    fn no_proxies() {
        assert_eq!(parse("serverAddr = \"x\""), vec![]);
    }

    #[test]
    fn bad_ports_only_invalidate_their_entry() {
        let input = r#"
[[proxies]]
name = "ssh"
type = "tcp"
localPort = 22
remotePort = 6000

[[proxies]]
name = "too-big"
type = "tcp"
localPort = 80
remotePort = 70000

[[proxies]]
name = "negative"
type = "udp"
localPort = -1
remotePort = 7000

[[proxies]]
name = "text"
type = "tcp"
localPort = 80
remotePort = "8080"
"#;

        let proxies = parse(input);
        assert_eq!(
            proxies,
            vec![
                proxy("ssh", Some(Protocol::Tcp), 22, 6000),
                proxy("too-big", Some(Protocol::Tcp), 80, 0),
                proxy("negative", Some(Protocol::Udp), 0, 7000),
                proxy("text", Some(Protocol::Tcp), 80, 0),
            ]
        );
        assert_eq!(
            proxies.iter().filter(|p| p.is_valid()).count(),
            2,
            "only ssh and negative keep a remote port"
        );
    }

    #[test]
    #[should_panic(expected = "Invalid frpc.toml")]
    fn syntax_error() {
        parse("[[proxies]\nname = ");
    }

    #[test]
    fn from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[[proxies]]\nname = \"web\"\ntype = \"tcp\"\nlocalPort = 80\nremotePort = 8080"
        )
        .unwrap();

        assert_eq!(
            parse_file(file.path()).unwrap(),
            vec![proxy("web", Some(Protocol::Tcp), 80, 8080)]
        );
    }
}

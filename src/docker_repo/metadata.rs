// Container identity and configuration from an inspect response.

use std::collections::BTreeMap;

use bollard::models::ContainerInspectResponse;

use crate::models::{ContainerMetadata, PortBinding};

const SHORT_ID_LEN: usize = 12;

fn short(id: &str) -> String {
    id.trim_start_matches("sha256:")
        .chars()
        .take(SHORT_ID_LEN)
        .collect()
}

pub(crate) fn from_inspect(inspect: &ContainerInspectResponse) -> ContainerMetadata {
    let config = inspect.config.as_ref();

    let image = config
        .and_then(|c| c.image.clone())
        .filter(|i| !i.is_empty())
        .or_else(|| inspect.image.as_deref().map(short))
        .unwrap_or_else(|| "unknown".to_string());

    let mut ports = BTreeMap::new();
    let port_map = inspect
        .network_settings
        .as_ref()
        .and_then(|n| n.ports.as_ref());
    for (port, bindings) in port_map.into_iter().flatten() {
        let Some(bindings) = bindings.as_ref().filter(|b| !b.is_empty()) else {
            continue;
        };
        ports.insert(
            port.clone(),
            bindings
                .iter()
                .map(|b| PortBinding {
                    host_ip: b.host_ip.clone().unwrap_or_default(),
                    host_port: b.host_port.clone().unwrap_or_default(),
                })
                .collect(),
        );
    }

    ContainerMetadata {
        short_id: inspect.id.as_deref().map(short).unwrap_or_default(),
        name: inspect
            .name
            .as_deref()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image,
        created_at: inspect
            .created
            .as_deref()
            .and_then(super::stats::parse_docker_time),
        labels: config
            .and_then(|c| c.labels.as_ref())
            .map(|l| l.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
        command: config.and_then(|c| c.cmd.clone()),
        ports,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerConfig, NetworkSettings, PortBinding as DockerPortBinding};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    #[test]
    fn metadata_from_full_inspect() {
        let inspect = ContainerInspectResponse {
            id: Some("0123456789abcdef0123".to_string()),
            name: Some("/web".to_string()),
            created: Some("2024-02-05T12:00:00Z".to_string()),
            config: Some(ContainerConfig {
                image: Some("nginx:1.25".to_string()),
                labels: Some(HashMap::from([("tier".to_string(), "front".to_string())])),
                cmd: Some(vec!["nginx".to_string(), "-g".to_string()]),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ports: Some(HashMap::from([
                    (
                        "80/tcp".to_string(),
                        Some(vec![DockerPortBinding {
                            host_ip: Some("0.0.0.0".to_string()),
                            host_port: Some("8080".to_string()),
                        }]),
                    ),
                    ("443/tcp".to_string(), None),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let m = from_inspect(&inspect);
        assert_eq!(m.short_id, "0123456789ab");
        assert_eq!(m.name, "web");
        assert_eq!(m.image, "nginx:1.25");
        assert_eq!(
            m.created_at,
            Some(Utc.with_ymd_and_hms(2024, 2, 5, 12, 0, 0).unwrap())
        );
        assert_eq!(m.labels.get("tier").map(String::as_str), Some("front"));
        assert_eq!(m.command.as_deref().map(<[String]>::len), Some(2));
        assert_eq!(m.ports.len(), 1);
        assert_eq!(m.ports["80/tcp"][0].host_port, "8080");
    }

    #[test]
    fn metadata_falls_back_to_short_image_id() {
        let inspect = ContainerInspectResponse {
            image: Some("sha256:feedfacecafebeef0000".to_string()),
            ..Default::default()
        };
        let m = from_inspect(&inspect);
        assert_eq!(m.image, "feedfacecafe");
        assert_eq!(m.created_at, None);
        assert!(m.ports.is_empty());
    }
}

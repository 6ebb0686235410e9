//! Configuration synthesis: profile + policy settings → [`ConfigDocument`].
//!
//! Pure and side-effect free. The only failures are an unknown mode or an
//! unknown transport; every other input is normalised.

use crate::singbox::dns::build_dns;
use crate::singbox::document::*;
use crate::singbox::policy::{ConnectionOptions, MetricsSettings};
use crate::singbox::routing::build_route;
use crate::singbox::types::*;

/// Build the full engine configuration for one connection attempt.
pub fn synthesize(
    profile: &Profile,
    options: &ConnectionOptions,
) -> Result<ConfigDocument, SingBoxError> {
    let template = Template::select(&options.mode, profile)?;
    if template.service_name().is_some_and(|s| s.trim().is_empty()) {
        log::warn!(
            "gRPC transport selected for {} with an empty service name",
            profile.host()
        );
    }

    let mode = template.mode();
    Ok(ConfigDocument {
        log: LogBlock::default(),
        dns: build_dns(options.dns.as_ref()),
        inbounds: Inbound::for_mode(mode),
        outbounds: build_outbounds(profile, &template),
        route: build_route(
            options.split_tunnel.as_ref(),
            options.region_routing.as_ref(),
            mode,
        ),
        experimental: build_experimental(options.observatory()),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Outbounds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_outbounds(profile: &Profile, template: &Template) -> Vec<Outbound> {
    vec![
        Outbound::Vless(Box::new(build_vless(profile, template))),
        Outbound::Direct {
            tag: OutboundTag::Direct,
        },
        Outbound::Block {
            tag: OutboundTag::Block,
        },
    ]
}

fn build_vless(profile: &Profile, template: &Template) -> VlessOutbound {
    let (transport, multiplex) = match template.service_name() {
        Some(service_name) => (
            Some(TransportBlock::Grpc {
                service_name: service_name.to_string(),
                idle_timeout: "15s".into(),
                permit_without_stream: true,
            }),
            MultiplexBlock::grpc_defaults(),
        ),
        None => (None, MultiplexBlock::disabled()),
    };

    VlessOutbound {
        tag: OutboundTag::Proxy,
        server: profile.host().to_string(),
        server_port: profile.port(),
        uuid: profile.uuid().to_string(),
        flow: optional(profile.flow()),
        packet_encoding: optional(profile.packet_encoding()),
        tls: TlsBlock {
            enabled: true,
            server_name: profile.sni().to_string(),
            utls: UtlsBlock {
                enabled: true,
                fingerprint: "chrome".into(),
            },
            reality: RealityBlock {
                enabled: true,
                public_key: profile.public_key().to_string(),
                short_id: profile.short_id().to_string(),
            },
        },
        transport,
        multiplex,
    }
}

fn optional(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Experimental
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_experimental(observatory: Option<&MetricsSettings>) -> Experimental {
    let mut experimental = Experimental {
        cache_file: CacheFileBlock::default(),
        observatory: None,
        clash_api: None,
    };
    if let Some(metrics) = observatory {
        let listen = metrics.listen();
        let token = metrics.token();
        experimental.observatory = Some(ObservatoryBlock {
            enabled: true,
            listen: listen.clone(),
            token: token.clone(),
        });
        experimental.clash_api = Some(ClashApiBlock {
            external_controller: listen,
            access_control_allow_origin: vec!["*".into()],
            secret: token,
        });
    }
    experimental
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::singbox::policy::*;
    use serde_json::{json, Value};

    fn profile() -> Profile {
        Profile::new("0f0e0d0c-1111-2222-3333-444455556666", "gw.example.net", 8443)
            .unwrap()
            .with_sni("www.microsoft.com")
            .with_reality("Zm9vYmFy", "ab12")
            .with_service_name("tunnel")
    }

    fn doc_json(profile: &Profile, options: &ConnectionOptions) -> Value {
        synthesize(profile, options).unwrap().to_value().unwrap()
    }

    #[test]
    fn bogus_mode_fails() {
        let err = synthesize(&profile(), &ConnectionOptions::with_mode("bogus")).unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::UnsupportedMode);
    }

    #[test]
    fn unknown_transport_fails() {
        let p = profile().with_transport("ws");
        let err = synthesize(&p, &ConnectionOptions::default()).unwrap_err();
        assert_eq!(err.kind, SingBoxErrorKind::UnsupportedTransport);
    }

    #[test]
    fn empty_settings_defaults() {
        let v = doc_json(&profile(), &ConnectionOptions::default());
        assert_eq!(v["dns"]["strategy"], "prefer_ipv4");
        assert_eq!(v["dns"]["servers"][0]["tag"], "secure");
        assert_eq!(
            v["route"]["rules"],
            json!([
                {"rule_set": "geosite-category-ads-all", "outbound": "block"},
                {"ip_is_private": true, "outbound": "direct"},
                {"inbound": ["socks-in", "http-in"], "outbound": "proxy"},
            ])
        );
        assert_eq!(v["route"]["auto_detect_interface"], true);
        assert_eq!(v["route"]["rule_set"].as_array().unwrap().len(), 1);
        assert_eq!(v["log"], json!({"level": "info", "timestamp": true}));
    }

    #[test]
    fn grpc_outbound_shape() {
        let v = doc_json(&profile(), &ConnectionOptions::default());
        let proxy = &v["outbounds"][0];
        assert_eq!(proxy["type"], "vless");
        assert_eq!(proxy["tag"], "proxy");
        assert_eq!(proxy["server"], "gw.example.net");
        assert_eq!(proxy["server_port"], 8443);
        assert!(proxy.get("flow").is_none());
        assert_eq!(proxy["tls"]["server_name"], "www.microsoft.com");
        assert_eq!(proxy["tls"]["utls"]["fingerprint"], "chrome");
        assert_eq!(proxy["tls"]["reality"]["public_key"], "Zm9vYmFy");
        assert_eq!(proxy["tls"]["reality"]["short_id"], "ab12");
        assert_eq!(
            proxy["transport"],
            json!({
                "type": "grpc",
                "service_name": "tunnel",
                "idle_timeout": "15s",
                "permit_without_stream": true
            })
        );
        assert_eq!(
            proxy["multiplex"],
            json!({"enabled": true, "max_connections": 8, "min_streams": 4, "max_streams": 32})
        );
        assert_eq!(v["outbounds"][1], json!({"type": "direct", "tag": "direct"}));
        assert_eq!(v["outbounds"][2], json!({"type": "block", "tag": "block"}));
    }

    #[test]
    fn tcp_outbound_has_no_transport() {
        let p = profile().with_transport("TCP").with_flow("xtls-rprx-vision");
        let v = doc_json(&p, &ConnectionOptions::default());
        let proxy = &v["outbounds"][0];
        assert!(proxy.get("transport").is_none());
        assert_eq!(proxy["multiplex"], json!({"enabled": false}));
        assert_eq!(proxy["flow"], "xtls-rprx-vision");
    }

    #[test]
    fn grpc_empty_service_name_still_builds() {
        let p = profile().with_service_name("");
        let v = doc_json(&p, &ConnectionOptions::default());
        assert_eq!(v["outbounds"][0]["transport"]["service_name"], "");
    }

    #[test]
    fn tun_mode_catch_all_includes_tun() {
        let v = doc_json(&profile(), &ConnectionOptions::with_mode("tun"));
        assert_eq!(v["inbounds"].as_array().unwrap().len(), 3);
        let rules = v["route"]["rules"].as_array().unwrap();
        assert_eq!(
            rules.last().unwrap()["inbound"],
            json!(["socks-in", "http-in", "tun-in"])
        );
    }

    #[test]
    fn hostile_strings_are_escaped() {
        let split = SplitTunnelSettings {
            block_domains: vec![r#"evil"},{"outbound":"direct"#.into(), r"back\slash".into()],
            ..Default::default()
        };
        let options = ConnectionOptions {
            split_tunnel: Some(split),
            ..Default::default()
        };
        let text = synthesize(&profile(), &options).unwrap().to_json_pretty().unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            v["route"]["rules"][0]["domain"],
            json!([r#"evil"},{"outbound":"direct"#, r"back\slash"])
        );
        assert_eq!(v["route"]["rules"][0]["outbound"], "block");
    }

    #[test]
    fn metrics_enabled_adds_observatory_and_clash_api() {
        let options = ConnectionOptions {
            metrics: Some(MetricsSettings {
                enable_observatory: true,
                observatory_listen: "".into(),
                observatory_token: "tok".into(),
            }),
            ..Default::default()
        };
        let v = doc_json(&profile(), &options);
        let exp = &v["experimental"];
        assert_eq!(exp["cache_file"]["enabled"], true);
        assert_eq!(
            exp["observatory"],
            json!({"enabled": true, "listen": "127.0.0.1:9090", "token": "tok"})
        );
        assert_eq!(
            exp["clash_api"],
            json!({
                "external_controller": "127.0.0.1:9090",
                "access_control_allow_origin": ["*"],
                "secret": "tok"
            })
        );
    }

    #[test]
    fn metrics_disabled_omits_observatory() {
        let options = ConnectionOptions {
            metrics: Some(MetricsSettings {
                enable_observatory: false,
                observatory_listen: "0.0.0.0:1".into(),
                observatory_token: "".into(),
            }),
            ..Default::default()
        };
        let v = doc_json(&profile(), &options);
        assert!(v["experimental"].get("observatory").is_none());
        assert!(v["experimental"].get("clash_api").is_none());
    }

    #[test]
    fn cache_slot_binding() {
        let mut doc = synthesize(&profile(), &ConnectionOptions::default()).unwrap();
        assert!(doc.cache_path_unbound());
        doc.bind_cache_path(std::path::Path::new("/var/lib/veilbox/cache.db"));
        assert!(!doc.cache_path_unbound());
        let v = doc.to_value().unwrap();
        assert_eq!(v["experimental"]["cache_file"]["path"], "/var/lib/veilbox/cache.db");
    }
}

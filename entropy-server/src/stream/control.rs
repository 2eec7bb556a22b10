use log::info;

use crate::auth::{self, AccessDenied, Principal, Role};
use crate::messages::{ConfigUpdate, ControlRequest, ControlResponse, Pong};

/// The gateway control channel: handshake, liveness, and self-reported
/// health. Gateways learn the server's acceptance limits from the
/// `Hello` response so they can size batches and clamp clocks locally.
pub fn handle_control(
    principal: &Principal,
    request: ControlRequest,
    gateway_limits: &ConfigUpdate,
) -> Result<ControlResponse, AccessDenied> {
    auth::require_role(principal, Role::Gateway)?;

    match request {
        ControlRequest::Hello(hello) => {
            info!(
                "Gateway {} said hello (firmware {})",
                hello.gateway_id,
                hello.firmware_version.as_deref().unwrap_or("unknown"),
            );
            Ok(ControlResponse::ConfigUpdate(gateway_limits.clone()))
        }
        ControlRequest::Ping(ping) => Ok(ControlResponse::Pong(Pong { nonce: ping.nonce })),
        ControlRequest::HealthReport(report) => {
            info!(
                "Health report from gateway {}: uptime {:?}s, voltage {:?}, temp {:?}C{}",
                report.gateway_id,
                report.uptime_seconds,
                report.detector_voltage,
                report.temperature_celsius,
                report
                    .message
                    .as_deref()
                    .map(|m| format!(" ({m})"))
                    .unwrap_or_default(),
            );
            Ok(ControlResponse::Ok)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{HealthReport, Hello, Ping};

    fn limits() -> ConfigUpdate {
        ConfigUpdate {
            max_batch_events: 2000,
            max_clock_skew_ahead_secs: 60,
            max_clock_skew_behind_hours: 24,
        }
    }

    fn gateway() -> Principal {
        Principal {
            name: "gw-03".to_string(),
            roles: vec![Role::Gateway],
        }
    }

    #[test]
    fn hello_yields_the_server_limits() {
        let response = handle_control(
            &gateway(),
            ControlRequest::Hello(Hello {
                gateway_id: "gw-03".to_string(),
                firmware_version: Some("2.4.1".to_string()),
            }),
            &limits(),
        )
        .unwrap();

        match response {
            ControlResponse::ConfigUpdate(update) => {
                assert_eq!(update.max_batch_events, 2000);
            }
            other => panic!("expected ConfigUpdate, got {other:?}"),
        }
    }

    #[test]
    fn ping_echoes_the_nonce() {
        let response = handle_control(
            &gateway(),
            ControlRequest::Ping(Ping {
                nonce: 9001,
                sent_at: None,
            }),
            &limits(),
        )
        .unwrap();

        match response {
            ControlResponse::Pong(pong) => assert_eq!(pong.nonce, 9001),
            other => panic!("expected Pong, got {other:?}"),
        }
    }

    #[test]
    fn health_report_is_acknowledged() {
        let response = handle_control(
            &gateway(),
            ControlRequest::HealthReport(HealthReport {
                gateway_id: "gw-03".to_string(),
                uptime_seconds: Some(86_400),
                detector_voltage: Some(402.5),
                temperature_celsius: Some(41.0),
                message: None,
            }),
            &limits(),
        )
        .unwrap();
        assert!(matches!(response, ControlResponse::Ok));
    }

    #[test]
    fn control_requires_the_gateway_capability() {
        let user = Principal {
            name: "analyst".to_string(),
            roles: vec![Role::User],
        };
        let result = handle_control(
            &user,
            ControlRequest::Ping(Ping {
                nonce: 1,
                sent_at: None,
            }),
            &limits(),
        );
        assert!(result.is_err());
    }
}

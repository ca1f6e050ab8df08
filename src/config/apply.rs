//! Applies setup document commands through a gateway.

use super::document::FeatureCommand;
use crate::session::{CommandGateway, SessionError};

/// Runs `commands` in order against one camera.
///
/// Stops at the first failure and returns it; commands already applied
/// stay applied. Returns the number of commands run.
pub fn apply<G>(gateway: &mut G, commands: &[FeatureCommand]) -> Result<usize, SessionError>
where
    G: CommandGateway + ?Sized,
{
    for command in commands {
        gateway.execute(
            &command.path,
            command.action.method(),
            Some(command.access),
            command.argument.clone(),
        )?;
    }
    tracing::debug!(serial = %gateway.serial(), commands = commands.len(), "Setup commands applied");
    Ok(commands.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SetupDocument;
    use crate::device::{AccessMode, FeatureValue, Method};

    type Call = (String, Method, Option<AccessMode>, Option<FeatureValue>);

    #[derive(Default)]
    struct RecordingGateway {
        calls: Vec<Call>,
        fail_on: Option<&'static str>,
    }

    impl CommandGateway for RecordingGateway {
        fn serial(&self) -> &str {
            "mock"
        }

        fn execute(
            &mut self,
            path: &str,
            method: Method,
            access: Option<AccessMode>,
            argument: Option<FeatureValue>,
        ) -> Result<Option<FeatureValue>, SessionError> {
            self.calls.push((path.to_owned(), method, access, argument));
            if self.fail_on == Some(path) {
                return Err(SessionError::UnknownFeature {
                    serial: "mock".to_owned(),
                    path: path.to_owned(),
                });
            }
            Ok(None)
        }
    }

    const DOCUMENT: &str = r#"
        init = [
            { UserSetLoad = {} },
            { Gain = { value = 2 } },
            { ExposureTime = { value = 500.0, access = "WO" } },
        ]
    "#;

    #[test]
    fn test_commands_map_to_gateway_calls() {
        let doc: SetupDocument = DOCUMENT.parse().unwrap();
        let mut gateway = RecordingGateway::default();

        assert_eq!(apply(&mut gateway, &doc.init).unwrap(), 3);
        assert_eq!(
            gateway.calls,
            vec![
                (
                    "UserSetLoad".to_owned(),
                    Method::Execute,
                    Some(AccessMode::WriteOnly),
                    None
                ),
                (
                    "Gain".to_owned(),
                    Method::SetValue,
                    Some(AccessMode::ReadWrite),
                    Some(FeatureValue::Integer(2))
                ),
                (
                    "ExposureTime".to_owned(),
                    Method::SetValue,
                    Some(AccessMode::WriteOnly),
                    Some(FeatureValue::Float(500.0))
                ),
            ]
        );
    }

    #[test]
    fn test_first_failure_stops_the_rest() {
        let doc: SetupDocument = DOCUMENT.parse().unwrap();
        let mut gateway = RecordingGateway {
            fail_on: Some("Gain"),
            ..Default::default()
        };

        let err = apply(&mut gateway, &doc.init).unwrap_err();
        assert!(matches!(err, SessionError::UnknownFeature { .. }));
        assert_eq!(gateway.calls.len(), 2);
    }
}

//! Validated access to a camera's feature tree.
//!
//! Every register read, write and command issued by the session goes
//! through [`execute`], which logs the call, resolves symbolic
//! arguments, walks the dotted feature path and checks the access mode
//! before touching the device.

use super::SessionError;
use crate::device::{resolve, AccessMode, Device, FeatureValue, Method};

/// Something that can run feature commands against one named camera.
pub trait CommandGateway {
    /// Serial of the camera commands are sent to.
    fn serial(&self) -> &str;

    /// Runs `method` on the feature at `path`.
    ///
    /// `access`, when given, must equal the feature's current access
    /// mode. Returns the value for [`Method::GetValue`], `None` otherwise.
    fn execute(
        &mut self,
        path: &str,
        method: Method,
        access: Option<AccessMode>,
        argument: Option<FeatureValue>,
    ) -> Result<Option<FeatureValue>, SessionError>;
}

/// Runs a feature command directly against a device.
pub fn execute(
    device: &mut dyn Device,
    path: &str,
    method: Method,
    access: Option<AccessMode>,
    argument: Option<FeatureValue>,
) -> Result<Option<FeatureValue>, SessionError> {
    let serial = device.serial().to_owned();
    let shown = argument.as_ref().map(ToString::to_string).unwrap_or_default();
    tracing::info!("{serial} - executing: {path}.{method}({shown})");

    let argument = match argument {
        Some(FeatureValue::String(text)) => Some(resolve_argument(device, text)?),
        other => other,
    };
    check_arity(method, argument.is_some())?;

    let feature = resolve(device.features(), path).ok_or_else(|| SessionError::UnknownFeature {
        serial: serial.clone(),
        path: path.to_owned(),
    })?;

    if let Some(required) = access {
        let actual = feature.access_mode();
        if actual != required {
            return Err(SessionError::AccessMode {
                path: path.to_owned(),
                required,
                actual,
            });
        }
    }

    let result = match (method, argument) {
        (Method::GetValue, _) => feature.get_value().map(Some),
        (Method::SetValue, Some(value)) => feature.set_value(value).map(|()| None),
        (Method::SetValue, None) => return Err(missing_value()),
        (Method::Execute, _) => feature.execute().map(|()| None),
    };
    result.map_err(|e| SessionError::device(&serial, e))
}

fn check_arity(method: Method, has_argument: bool) -> Result<(), SessionError> {
    match (method, has_argument) {
        (Method::SetValue, false) => Err(missing_value()),
        (Method::GetValue | Method::Execute, true) => Err(SessionError::UnsupportedArgument(
            format!("{method} takes no argument"),
        )),
        _ => Ok(()),
    }
}

fn missing_value() -> SessionError {
    SessionError::UnsupportedArgument("SetValue requires a value".to_owned())
}

/// Turns `<namespace>.<Symbol>` into the SDK value it names.
///
/// Strings outside the device's namespace pass through unchanged.
fn resolve_argument(device: &dyn Device, text: String) -> Result<FeatureValue, SessionError> {
    let Some(symbol) = text
        .strip_prefix(device.symbol_namespace())
        .and_then(|rest| rest.strip_prefix('.'))
    else {
        return Ok(FeatureValue::String(text));
    };

    if symbol.contains('.') {
        return Err(SessionError::UnsupportedArgument(format!(
            "nested symbol reference {text}"
        )));
    }
    device
        .resolve_symbol(symbol)
        .ok_or_else(|| SessionError::UnsupportedArgument(format!("unknown symbol {text}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceSystem, SimCameraSpec, SimEvent, SimRig};

    fn device(rig: &SimRig) -> Box<dyn Device> {
        let mut device = rig.system().enumerate().unwrap().pop().unwrap();
        device.init().unwrap();
        device
    }

    #[test]
    fn test_symbolic_argument_is_resolved() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("100")]);
        let mut device = device(&rig);

        execute(
            device.as_mut(),
            "AcquisitionMode",
            Method::SetValue,
            Some(AccessMode::ReadWrite),
            Some(FeatureValue::String("Sim.AcquisitionMode_SingleFrame".to_owned())),
        )
        .unwrap();

        assert_eq!(
            rig.value("100", "AcquisitionMode"),
            Some(FeatureValue::Enumeration("SingleFrame".to_owned()))
        );
    }

    #[test]
    fn test_nested_and_unknown_symbols_rejected() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("100")]);
        let mut device = device(&rig);

        for text in ["Sim.AcquisitionMode.SingleFrame", "Sim.NoSuchSymbol"] {
            let err = execute(
                device.as_mut(),
                "AcquisitionMode",
                Method::SetValue,
                None,
                Some(FeatureValue::String(text.to_owned())),
            )
            .unwrap_err();
            assert!(matches!(err, SessionError::UnsupportedArgument(_)), "{text}");
        }
    }

    #[test]
    fn test_unknown_feature() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("100")]);
        let mut device = device(&rig);

        let err = execute(device.as_mut(), "TLStream.Bogus", Method::GetValue, None, None)
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownFeature { ref path, .. } if path == "TLStream.Bogus"));
    }

    #[test]
    fn test_access_mode_mismatch() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("100")]);
        let mut device = device(&rig);

        let err = execute(
            device.as_mut(),
            "TimestampLatchValue",
            Method::GetValue,
            Some(AccessMode::ReadWrite),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SessionError::AccessMode {
                required: AccessMode::ReadWrite,
                actual: AccessMode::ReadOnly,
                ..
            }
        ));
    }

    #[test]
    fn test_execute_and_get_value() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("100")]);
        let mut device = device(&rig);

        let value = execute(device.as_mut(), "Gain", Method::GetValue, None, None).unwrap();
        assert_eq!(value, Some(FeatureValue::Float(0.0)));

        let value = execute(
            device.as_mut(),
            "UserSetLoad",
            Method::Execute,
            Some(AccessMode::WriteOnly),
            None,
        )
        .unwrap();
        assert_eq!(value, None);
        assert!(rig.events("100").contains(&SimEvent::Execute {
            feature: "UserSetLoad".to_owned()
        }));
    }

    #[test]
    fn test_argument_arity() {
        let rig = SimRig::with_cameras([SimCameraSpec::new("100")]);
        let mut device = device(&rig);

        assert!(execute(device.as_mut(), "Gain", Method::SetValue, None, None).is_err());
        assert!(execute(
            device.as_mut(),
            "UserSetLoad",
            Method::Execute,
            None,
            Some(FeatureValue::Integer(1))
        )
        .is_err());
    }
}

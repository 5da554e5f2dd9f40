//! Parameter handling shared by the components.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Set one field of a parameter struct from its textual value.
///
/// The value is read as JSON when possible (`20`, `true`, `1e-6`) and as
/// a plain string otherwise, so `set_param(&mut c, "classifier",
/// "nearest-mean")` works without quoting.
pub fn set_param<T>(config: &mut T, key: &str, value: &str) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    let mut tree = serde_json::to_value(&*config)?;
    let fields = match tree.as_object_mut() {
        Some(fields) if fields.contains_key(key) => fields,
        _ => return Err(Error::UnknownParameter(key.to_string())),
    };
    let parsed = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    fields.insert(key.to_string(), parsed);
    *config = serde_json::from_value(tree)?;
    Ok(())
}

/// The saved form of a component chosen by name: which implementation,
/// and its opaque state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentState {
    pub name: String,
    pub state: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Params {
        maxcost: f32,
        use_props: bool,
        name: String,
    }

    #[test]
    fn test_set_param() {
        let mut p = Params {
            maxcost: 20.0,
            use_props: true,
            name: "cfmap".to_string(),
        };
        set_param(&mut p, "maxcost", "12.5").unwrap();
        set_param(&mut p, "use_props", "false").unwrap();
        set_param(&mut p, "name", "sfmap").unwrap();
        assert_eq!(
            p,
            Params {
                maxcost: 12.5,
                use_props: false,
                name: "sfmap".to_string(),
            }
        );
        assert!(matches!(
            set_param(&mut p, "nonsense", "1"),
            Err(Error::UnknownParameter(_))
        ));
        assert!(matches!(
            set_param(&mut p, "maxcost", "high"),
            Err(Error::Json(_))
        ));
    }
}

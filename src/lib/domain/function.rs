use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Key expression that resolves to the requester's address.
pub const MSG_SENDER: &str = "msg.sender";

/// A declared function parameter. Inputs accumulate their `value` as
/// parties submit arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Param {
    pub fn new(name: &str, ty: &str, owner: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.to_string(),
            owner: owner.to_string(),
            value: None,
        }
    }
}

/// A storage slot touched by a function, with the key expressions used to
/// index it (empty for scalar slots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateAccess {
    pub name: String,
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Which of a function's state lists to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSide {
    Read,
    Mutate,
}

/// One concrete storage location: a slot and, for mappings, a resolved key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLocation {
    pub slot: String,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("parameter already bound: {0}")]
    AlreadyBound(String),

    #[error("unresolved key {key} for slot {slot}")]
    UnresolvedKey { slot: String, key: String },
}

/// A contract function as declared by its confidentiality policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionBinding {
    pub name: String,
    #[serde(rename = "type", default = "default_function_type")]
    pub ty: String,
    pub inputs: Vec<Param>,
    #[serde(default)]
    pub outputs: Vec<Param>,
    #[serde(default)]
    pub read: Vec<StateAccess>,
    #[serde(default)]
    pub mutate: Vec<StateAccess>,
}

fn default_function_type() -> String {
    "function".to_string()
}

impl FunctionBinding {
    /// Bind a value to a declared input.
    ///
    /// Rebinding is an error rather than a no-op so a duplicate or late
    /// submission is visible to the caller.
    pub fn bind(&mut self, name: &str, value: &str) -> Result<(), BindingError> {
        let input = self
            .inputs
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| BindingError::UnknownParameter(name.to_string()))?;

        if input.value.is_some() {
            return Err(BindingError::AlreadyBound(name.to_string()));
        }
        input.value = Some(value.to_string());
        Ok(())
    }

    /// True iff every declared input holds a value.
    pub fn is_complete(&self) -> bool {
        self.inputs.iter().all(|p| p.value.is_some())
    }

    /// Names of inputs still waiting for a value.
    pub fn unbound_inputs(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .filter(|p| p.value.is_none())
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Bound value of an input, if any.
    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_deref())
    }

    fn accesses(&self, side: AccessSide) -> &[StateAccess] {
        match side {
            AccessSide::Read => &self.read,
            AccessSide::Mutate => &self.mutate,
        }
    }

    fn resolve_key(&self, slot: &str, key: &str, requester: Address) -> Result<String, BindingError> {
        if key == MSG_SENDER {
            return Ok(requester.to_checksum(None));
        }
        self.value_of(key)
            .map(str::to_string)
            .ok_or_else(|| BindingError::UnresolvedKey {
                slot: slot.to_string(),
                key: key.to_string(),
            })
    }

    /// Resolve every key expression of `slot` on the given side.
    pub fn resolve_keys(
        &self,
        side: AccessSide,
        slot: &str,
        requester: Address,
    ) -> Result<Vec<String>, BindingError> {
        let mut keys = Vec::new();
        for access in self.accesses(side).iter().filter(|a| a.name == slot) {
            for key in &access.keys {
                keys.push(self.resolve_key(slot, key, requester)?);
            }
        }
        Ok(keys)
    }

    /// Flatten one side into ordered storage locations. Old states line up
    /// with the read side, new states with the mutate side.
    pub fn state_locations(
        &self,
        side: AccessSide,
        requester: Address,
    ) -> Result<Vec<StateLocation>, BindingError> {
        let mut locations = Vec::new();
        for access in self.accesses(side) {
            if access.keys.is_empty() {
                locations.push(StateLocation {
                    slot: access.name.clone(),
                    key: None,
                });
                continue;
            }
            for key in &access.keys {
                locations.push(StateLocation {
                    slot: access.name.clone(),
                    key: Some(self.resolve_key(&access.name, key, requester)?),
                });
            }
        }
        Ok(locations)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn transfer_binding() -> FunctionBinding {
        FunctionBinding {
            name: "transfer".to_string(),
            ty: "function".to_string(),
            inputs: vec![
                Param::new("to", "address", "all"),
                Param::new("amount", "uint256", "msg.sender"),
            ],
            outputs: vec![],
            read: vec![StateAccess {
                name: "balances".to_string(),
                keys: vec![MSG_SENDER.to_string(), "to".to_string()],
            }],
            mutate: vec![
                StateAccess {
                    name: "balances".to_string(),
                    keys: vec![MSG_SENDER.to_string(), "to".to_string()],
                },
                StateAccess {
                    name: "total_transfers".to_string(),
                    keys: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_bind_and_complete() {
        let mut f = transfer_binding();
        assert!(!f.is_complete());

        f.bind("amount", "100").unwrap();
        assert!(!f.is_complete());
        assert_eq!(f.unbound_inputs(), vec!["to"]);

        f.bind("to", "0xbb").unwrap();
        assert!(f.is_complete());
    }

    #[test]
    fn test_bind_unknown_parameter() {
        let mut f = transfer_binding();
        assert_eq!(
            f.bind("memo", "hi"),
            Err(BindingError::UnknownParameter("memo".to_string()))
        );
    }

    #[test]
    fn test_rebind_rejected_first_value_kept() {
        let mut f = transfer_binding();
        f.bind("amount", "100").unwrap();

        assert_eq!(
            f.bind("amount", "999"),
            Err(BindingError::AlreadyBound("amount".to_string()))
        );
        assert_eq!(f.value_of("amount"), Some("100"));
    }

    #[test]
    fn test_resolve_keys_msg_sender_and_input() {
        let mut f = transfer_binding();
        f.bind("to", "0xBB").unwrap();
        let requester = Address::repeat_byte(0xAA);

        let keys = f.resolve_keys(AccessSide::Read, "balances", requester).unwrap();
        assert_eq!(keys, vec![requester.to_checksum(None), "0xBB".to_string()]);
    }

    #[test]
    fn test_resolve_keys_unbound_input() {
        let f = transfer_binding();
        let result = f.resolve_keys(AccessSide::Mutate, "balances", Address::ZERO);
        assert!(matches!(result, Err(BindingError::UnresolvedKey { .. })));
    }

    #[test]
    fn test_resolve_keys_unknown_slot_is_empty() {
        let f = transfer_binding();
        let keys = f.resolve_keys(AccessSide::Read, "allowances", Address::ZERO).unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_state_locations_include_scalar_slots() {
        let mut f = transfer_binding();
        f.bind("to", "0xBB").unwrap();
        f.bind("amount", "1").unwrap();

        let locations = f.state_locations(AccessSide::Mutate, Address::ZERO).unwrap();
        assert_eq!(locations.len(), 3);
        assert_eq!(locations[2].slot, "total_transfers");
        assert_eq!(locations[2].key, None);
    }

    #[test]
    fn test_binding_json_shape() {
        let json = r#"{
            "name": "transfer",
            "inputs": [{"name": "amount", "type": "uint256", "owner": "msg.sender"}],
            "read": [{"name": "balances", "keys": ["msg.sender"]}]
        }"#;
        let f: FunctionBinding = serde_json::from_str(json).unwrap();
        assert_eq!(f.ty, "function");
        assert!(f.mutate.is_empty());
        assert_eq!(f.inputs[0].value, None);
    }
}

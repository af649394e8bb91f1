use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use swarm_protocol::SessionPatch;

/// Per-client session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Set once a bearer token or a login handler authenticates the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Bot-defined keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    /// Record the client address. Values already present are kept.
    pub fn set_client(&mut self, ip: &str, port: Option<u16>) {
        if self.ip.is_none() {
            self.ip = Some(ip.to_string());
        }
        if self.port.is_none() {
            self.port = port;
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.uid.is_some()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "ip" => self.ip.clone().map(Value::String),
            "port" => self.port.map(Value::from),
            "uid" => self.uid.clone().map(Value::String),
            _ => self.extra.get(key).cloned(),
        }
    }

    /// Merge a handler's patch: `Some` sets the key, `None` deletes it.
    pub fn apply(&mut self, patch: &SessionPatch) {
        for (key, value) in patch {
            match (key.as_str(), value) {
                ("ip", v) => self.ip = v.as_ref().map(value_to_string),
                ("port", v) => {
                    self.port = v
                        .as_ref()
                        .and_then(Value::as_u64)
                        .and_then(|p| u16::try_from(p).ok())
                },
                ("uid", v) => self.uid = v.as_ref().map(value_to_string),
                (_, Some(v)) => {
                    self.extra.insert(key.clone(), v.clone());
                },
                (_, None) => {
                    self.extra.remove(key);
                },
            }
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

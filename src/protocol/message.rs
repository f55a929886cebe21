use serde::{Deserialize, Serialize};

/// Client id used for every request sent by this side.
pub const CLIENT_ID: &str = "app";

/// Cleartext wrapper around an encrypted [`Pack`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    #[serde(default)]
    pub cid: String,
    // 1 when the pack was encrypted with the default key
    #[serde(default)]
    pub i: u8,
    pub t: String,
    #[serde(default)]
    pub uid: i64,
    #[serde(default)]
    pub pack: String,
}

impl Envelope {
    pub const PACK: &'static str = "pack";
}

/*
Payload types, keyed by `t`:

scan    -> discovery request, sent in the clear
dev     <- discovery answer with the device MAC
bind    -> ask for the device key
bindok  <- device key
status  -> read `cols`
dat     <- `dat` values for each of `cols`
cmd     -> write `p` values to each of `opt`
res     <- `val` now applied to each of `opt`
 */
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum Pack {
    Scan,
    Dev {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mac: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cid: Option<String>,
    },
    Bind {
        mac: String,
        uid: i64,
    },
    BindOk {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mac: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cid: Option<String>,
        key: String,
    },
    Status {
        mac: String,
        cols: Vec<String>,
    },
    Dat {
        cols: Vec<String>,
        dat: Vec<i64>,
    },
    Cmd {
        opt: Vec<String>,
        p: Vec<i64>,
    },
    Res {
        opt: Vec<String>,
        val: Vec<i64>,
    },
}

impl Pack {
    pub fn kind(&self) -> &'static str {
        match self {
            Pack::Scan => "scan",
            Pack::Dev { .. } => "dev",
            Pack::Bind { .. } => "bind",
            Pack::BindOk { .. } => "bindok",
            Pack::Status { .. } => "status",
            Pack::Dat { .. } => "dat",
            Pack::Cmd { .. } => "cmd",
            Pack::Res { .. } => "res",
        }
    }
}

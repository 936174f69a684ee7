//! ECU registry
//!
//! Static table of the ECUs the Tester knows how to talk to: which wire
//! protocol each one speaks, the ISO keyword bytes it answers a 5-baud init
//! with, and any extra bytes it sends right after the keyword.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::EcuDef;

/// Wire protocol spoken by an ECU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    Kwp71,
    Fiat9141,
    Marelli1Af,
    /// Early variant of the protocol Bosch later used for the Smartra III
    /// immobilizer.
    BoschAlarm,
    /// Reserved; no decoder yet.
    BilsteinSuspension,
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolType::Kwp71 => "KWP71",
            ProtocolType::Fiat9141 => "FIAT9141",
            ProtocolType::Marelli1Af => "Marelli 1AF",
            ProtocolType::BoschAlarm => "Bosch alarm",
            ProtocolType::BilsteinSuspension => "Bilstein suspension",
        };
        f.write_str(name)
    }
}

/// Registry entry for one ECU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcuProfile {
    pub protocol: ProtocolType,
    pub iso_keyword: Vec<u8>,
    pub extra_init_info: Vec<u8>,
}

/// Immutable ECU table, built once at startup
#[derive(Debug, Clone, Default)]
pub struct EcuRegistry {
    ecus: HashMap<u16, EcuProfile>,
}

impl EcuRegistry {
    /// Table of the ECUs known out of the box.
    pub fn builtin() -> Self {
        let entries = [
            (145, ProtocolType::Kwp71, vec![0x55, 0x00, 0x81], vec![]),
            (146, ProtocolType::Fiat9141, vec![0x55, 0x08, 0x08], vec![]),
            (
                147,
                ProtocolType::Marelli1Af,
                vec![0x55, 0x80, 0x80],
                vec![0x7F, 0x01],
            ),
            (148, ProtocolType::BoschAlarm, vec![0x55, 0xD3, 0x94], vec![]),
            (
                149,
                ProtocolType::BilsteinSuspension,
                vec![0x55, 0x01, 0x8A],
                vec![],
            ),
        ];

        let ecus = entries
            .into_iter()
            .map(|(id, protocol, iso_keyword, extra_init_info)| {
                (
                    id,
                    EcuProfile {
                        protocol,
                        iso_keyword,
                        extra_init_info,
                    },
                )
            })
            .collect();
        Self { ecus }
    }

    /// Build from configured definitions; an empty list means [`builtin`].
    ///
    /// [`builtin`]: EcuRegistry::builtin
    pub fn from_defs(defs: &[EcuDef]) -> Self {
        if defs.is_empty() {
            return Self::builtin();
        }
        let ecus = defs
            .iter()
            .map(|def| {
                (
                    def.id,
                    EcuProfile {
                        protocol: def.protocol,
                        iso_keyword: def.iso_keyword.clone(),
                        extra_init_info: def.extra_init_info.clone(),
                    },
                )
            })
            .collect();
        Self { ecus }
    }

    pub fn get(&self, ecu_id: u16) -> Option<&EcuProfile> {
        self.ecus.get(&ecu_id)
    }

    pub fn protocol(&self, ecu_id: u16) -> Option<ProtocolType> {
        self.get(ecu_id).map(|p| p.protocol)
    }

    pub fn len(&self) -> usize {
        self.ecus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ecus.is_empty()
    }
}

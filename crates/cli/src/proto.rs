// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain vocabulary shared by every role: departments, office status,
//! message shapes, priority classes, and the shutdown sentinel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Message class carrying ticket requests on the registration channel and
/// payment requests on the cashier channel.
pub const CLASS_REQUEST: u32 = 1;
/// Department-channel class for VIP tickets. Lower class = served first.
pub const CLASS_VIP: u32 = 1;
/// Department-channel class for normal tickets.
pub const CLASS_NORMAL: u32 = 2;
/// Department-channel class for return-from-cashier messages. Never picked
/// up by the regular clerk drain; consumed only by an explicit `Exact(3)`.
pub const CLASS_CASHIER_RETURN: u32 = 3;

/// Client id 0 never names a real process; a message carrying it tells the
/// consumer to terminate after draining the current message.
pub const SENTINEL_ID: u32 = 0;

/// Service departments, in ticket-counter slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dept {
    SA,
    SC,
    KM,
    ML,
    PD,
}

impl Dept {
    pub const ALL: [Dept; 5] = [Dept::SA, Dept::SC, Dept::KM, Dept::ML, Dept::PD];

    /// Targets a general-admissions clerk may redirect to.
    pub const REDIRECT_TARGETS: [Dept; 4] = [Dept::SC, Dept::KM, Dept::ML, Dept::PD];

    /// Slot in the per-department counter/quota arrays.
    pub fn index(self) -> usize {
        match self {
            Dept::SA => 0,
            Dept::SC => 1,
            Dept::KM => 2,
            Dept::ML => 3,
            Dept::PD => 4,
        }
    }

    pub fn from_index(index: u32) -> Option<Dept> {
        Dept::ALL.get(index as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dept::SA => "SA",
            Dept::SC => "SC",
            Dept::KM => "KM",
            Dept::ML => "ML",
            Dept::PD => "PD",
        }
    }

    /// One-character substrate tag of this department's channel socket.
    pub fn tag(self) -> char {
        match self {
            Dept::SA => 'A',
            Dept::SC => 'C',
            Dept::KM => 'K',
            Dept::ML => 'L',
            Dept::PD => 'P',
        }
    }
}

impl fmt::Display for Dept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dept {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SA" => Ok(Dept::SA),
            "SC" => Ok(Dept::SC),
            "KM" => Ok(Dept::KM),
            "ML" => Ok(Dept::ML),
            "PD" => Ok(Dept::PD),
            other => anyhow::bail!("invalid department: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfficeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    None,
    OfficeClosed,
    LimitReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceAction {
    Complete,
    GoToCashier,
}

/// Client → registration. The department travels as a raw slot index so a
/// malformed value survives the wire and can be coerced (to SA) at the
/// consuming end instead of poisoning the whole frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRequest {
    pub client_id: u32,
    pub department: u32,
    pub is_vip: bool,
    pub has_child: bool,
}

/// Registration → client, and client → department channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketIssued {
    pub client_id: u32,
    pub ticket_number: u32,
    pub department: Dept,
    pub redirected_from_sa: bool,
    pub reject: RejectReason,
    pub is_vip: bool,
}

/// Clerk or cashier → client, addressed by client id on the registration
/// channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDone {
    pub client_id: u32,
    pub department: Dept,
    pub action: ServiceAction,
}

/// Client → cashier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashierRequest {
    pub client_id: u32,
    pub department: Dept,
}

/// Client → clerk after paying, on the department channel at class 3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashierReturn {
    pub client_id: u32,
    pub department: Dept,
}

/// Every payload a channel can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Msg {
    TicketRequest(TicketRequest),
    TicketIssued(TicketIssued),
    ServiceDone(ServiceDone),
    CashierRequest(CashierRequest),
    CashierReturn(CashierReturn),
}

impl Msg {
    pub fn client_id(&self) -> u32 {
        match self {
            Msg::TicketRequest(m) => m.client_id,
            Msg::TicketIssued(m) => m.client_id,
            Msg::ServiceDone(m) => m.client_id,
            Msg::CashierRequest(m) => m.client_id,
            Msg::CashierReturn(m) => m.client_id,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.client_id() == SENTINEL_ID
    }

    /// Sentinel for the registration channel.
    pub fn registration_sentinel() -> Msg {
        Msg::TicketRequest(TicketRequest {
            client_id: SENTINEL_ID,
            department: 0,
            is_vip: false,
            has_child: false,
        })
    }

    /// Sentinel for a department channel.
    pub fn clerk_sentinel(department: Dept) -> Msg {
        Msg::TicketIssued(TicketIssued {
            client_id: SENTINEL_ID,
            ticket_number: 0,
            department,
            redirected_from_sa: false,
            reject: RejectReason::None,
            is_vip: false,
        })
    }

    /// Sentinel for the cashier channel.
    pub fn cashier_sentinel() -> Msg {
        Msg::CashierRequest(CashierRequest { client_id: SENTINEL_ID, department: Dept::SA })
    }
}

#[cfg(test)]
#[path = "proto_tests.rs"]
mod tests;

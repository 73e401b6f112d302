use crate::node::finger_entry::FingerEntry;
use crate::threads::chord::chord_proto::{FingerEntryMsg, HashPosMsg};
use crate::utils::types::HashPos;

impl Into<FingerEntryMsg> for FingerEntry {
    fn into(self) -> FingerEntryMsg {
        FingerEntryMsg {
            address: self.address,
            id: self.id,
            pos: self.pos.to_be_bytes().to_vec(),
        }
    }
}

impl Into<FingerEntryMsg> for &FingerEntry {
    fn into(self) -> FingerEntryMsg {
        self.clone().into()
    }
}

impl Into<FingerEntry> for FingerEntryMsg {
    fn into(self) -> FingerEntry {
        FingerEntry {
            address: self.address,
            id: self.id,
            pos: HashPos::from_be_bytes(self.pos.try_into().unwrap()),
        }
    }
}

impl Into<FingerEntry> for &FingerEntryMsg {
    fn into(self) -> FingerEntry {
        self.clone().into()
    }
}

impl Into<HashPosMsg> for HashPos {
    fn into(self) -> HashPosMsg {
        HashPosMsg {
            pos: self.to_be_bytes().to_vec(),
        }
    }
}

impl Into<HashPos> for HashPosMsg {
    fn into(self) -> HashPos {
        HashPos::from_be_bytes(self.pos.try_into().unwrap())
    }
}

impl Into<HashPos> for &HashPosMsg {
    fn into(self) -> HashPos {
        self.clone().into()
    }
}

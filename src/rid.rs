/// Uniquely identifies the location of a record in a paged file: the page it
/// lives on and its slot within that page's slot directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rid {
    pub page_num: u32,
    pub slot_num: u32,
}

impl Rid {
    /// page_num == 0 is reserved: page 0 always holds the file header, so no
    /// live record can ever sit there. Used as the "no next"/"no target" value
    /// in next-slot chains, forwarder links and leaf sibling pointers.
    pub const NULL: Rid = Rid {
        page_num: 0,
        slot_num: 0,
    };

    pub fn new(page_num: u32, slot_num: u32) -> Self {
        Rid { page_num, slot_num }
    }

    pub fn is_null(&self) -> bool {
        self.page_num == 0
    }

    pub(crate) fn to_le_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.page_num.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot_num.to_le_bytes());
        buf
    }

    pub(crate) fn from_le_bytes(bytes: &[u8]) -> Self {
        Rid {
            page_num: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            slot_num: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_num, self.slot_num)
    }
}

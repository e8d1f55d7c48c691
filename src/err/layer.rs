/// Layers on which an error can occur while decoding a received packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Layer {
    /// Error occurred in the IPv4 header.
    Ipv4Header,
    /// Error occurred while decoding an IGMPv1/v2 message.
    IgmpMessage,
    /// Error occurred while decoding an IGMPv3 membership report.
    IgmpV3Report,
    /// Error occurred while decoding an IGMPv3 membership query.
    IgmpV3Query,
    /// Error occurred while decoding a multicast address record of a
    /// v3 report (IGMPv3 or MLDv2).
    GroupRecord,
    /// Error occurred while decoding an MLDv1 message.
    MldMessage,
    /// Error occurred while decoding an MLDv2 listener report.
    MldV2Report,
    /// Error occurred while decoding an MLDv2 listener query.
    MldV2Query,
    /// Error occurred while decoding a kernel cache-miss upcall.
    CacheMiss,
}

impl Layer {
    /// Title of the error of this layer (e.g. "IGMPv3 Report Error").
    pub fn error_title(&self) -> &'static str {
        use Layer::*;
        match self {
            Ipv4Header => "IPv4 Header Error",
            IgmpMessage => "IGMP Message Error",
            IgmpV3Report => "IGMPv3 Report Error",
            IgmpV3Query => "IGMPv3 Query Error",
            GroupRecord => "Group Record Error",
            MldMessage => "MLD Message Error",
            MldV2Report => "MLDv2 Report Error",
            MldV2Query => "MLDv2 Query Error",
            CacheMiss => "Kernel Cache-Miss Error",
        }
    }
}

impl core::fmt::Display for Layer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use Layer::*;
        match self {
            Ipv4Header => write!(f, "IPv4 header"),
            IgmpMessage => write!(f, "IGMP message"),
            IgmpV3Report => write!(f, "IGMPv3 membership report"),
            IgmpV3Query => write!(f, "IGMPv3 membership query"),
            GroupRecord => write!(f, "multicast address record"),
            MldMessage => write!(f, "MLD message"),
            MldV2Report => write!(f, "MLDv2 listener report"),
            MldV2Query => write!(f, "MLDv2 listener query"),
            CacheMiss => write!(f, "kernel cache-miss message"),
        }
    }
}

use std::ffi::CString;

use crate::icmp6::ndp::MacAddr;

pub fn name_to_index(name: &str) -> Result<libc::c_uint, crate::Error> {
    let c_name = CString::new(name).map_err(|_| crate::Error::InterfaceNotFound { name: name.to_owned() })?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        log::debug!("if_nametoindex({}): {}", name, std::io::Error::last_os_error());
        return Err(crate::Error::InterfaceNotFound { name: name.to_owned() });
    }
    Ok(index)
}

/// The interface the responder answers on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub if_index: libc::c_uint,
    pub if_name: String,

    /// None for links without an Ethernet address (e.g. tunnels)
    pub link_layer_address: Option<MacAddr>,
}

impl Interface {
    /// Looks up `name` and its hardware address over rtnetlink.
    pub async fn resolve(name: &str) -> Result<Self, crate::Error> {
        let if_index = name_to_index(name)?;
        let rtnl = crate::rtnl::RtnetlinkConnection::new().await?;
        let mut link_manager = rtnl.link();
        let link_layer_address = match link_manager.get_link_layer_address(if_index).await? {
            Some(addr) if addr.len() == MacAddr::LEN => MacAddr::from_slice(&addr),
            Some(addr) => {
                log::warn!("{}: link-layer address {:02x?} is not an Ethernet address, omitting it", name, addr);
                None
            }
            None => {
                log::warn!("{}: no link-layer address", name);
                None
            }
        };

        Ok(Self {
            if_index,
            if_name: name.to_owned(),
            link_layer_address,
        })
    }
}

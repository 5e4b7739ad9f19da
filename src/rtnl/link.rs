use futures::TryStreamExt;

pub struct LinkManager {
    handle: rtnetlink::LinkHandle,
}

impl LinkManager {
    pub(crate) fn new(handle: &super::RtnetlinkConnection) -> Self {
        Self { handle: handle.handle.link() }
    }

    /// Hardware address of `if_index` (`IFLA_ADDRESS`), if the link has one.
    pub async fn get_link_layer_address(&mut self, if_index: libc::c_uint) -> Result<Option<Vec<u8>>, std::io::Error> {
        let response = self.handle.get().match_index(if_index).execute();
        futures::pin_mut!(response);
        while let Some(response) = response.try_next().await.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))? {
            for link in response.attributes.iter() {
                if let netlink_packet_route::link::LinkAttribute::Address(addr) = link {
                    log::debug!("link {}: address {:02x?}", if_index, addr);
                    return Ok(Some(addr.clone()));
                }
            }
        }
        Ok(None)
    }
}

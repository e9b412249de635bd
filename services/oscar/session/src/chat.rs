//! Chat and chat-navigation flows.
//!
//! Chat rooms live behind two services: the navigator (family 0x000d) hands
//! out exchange rights and creates rooms, and each joined room is its own
//! connection speaking family 0x000e. This module builds the outbound
//! requests and parses the structures both families carry.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::warn;

use oscar_wire::{Reader, TlvChain, UserInfo, WireError, FAMILY_CHATNAV};

use crate::conn::Connection;
use crate::dispatch::Dispatcher;
use crate::error::SessionError;
use crate::tx::TxQueue;

/// Chatnav subtype: rights request.
pub const CHATNAV_REQ_RIGHTS: u16 = 0x0002;
/// Chatnav subtype: room creation.
pub const CHATNAV_CREATE_ROOM: u16 = 0x0008;
/// Chatnav subtype: info reply.
pub const CHATNAV_INFO: u16 = 0x0009;

const TLV_MAX_ROOMS: u16 = 0x0002;
const TLV_EXCHANGE: u16 = 0x0003;
const TLV_ROOM: u16 = 0x0004;
const TLV_ROOM_FQN: u16 = 0x006a;
const TLV_OCCUPANT_COUNT: u16 = 0x006f;
const TLV_OCCUPANT_LIST: u16 = 0x0073;
const TLV_ROOM_FLAGS: u16 = 0x00c9;
const TLV_CREATION_TIME: u16 = 0x00ca;
const TLV_MAX_MSG_LEN: u16 = 0x00d1;
const TLV_MAX_OCCUPANCY: u16 = 0x00d2;
const TLV_ROOM_NAME: u16 = 0x00d3;
const TLV_CREATE_PERM: u16 = 0x00d5;
const TLV_CHARSET: u16 = 0x00d6;
const TLV_LANG: u16 = 0x00d7;

/// The exchange/name/instance triple that addresses a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    /// Exchange number
    pub exchange: u16,
    /// Room name
    pub name: String,
    /// Room instance
    pub instance: u16,
}

impl RoomInfo {
    /// Parse from the front of a reader: u16 exchange, u8-prefixed name,
    /// u16 instance.
    pub fn read(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let exchange = r.u16()?;
        let name_len = r.u8()? as usize;
        let name = String::from_utf8_lossy(r.bytes(name_len)?).into_owned();
        let instance = r.u16()?;
        Ok(RoomInfo {
            exchange,
            name,
            instance,
        })
    }

    /// Serialize in the same layout.
    pub fn write(&self, buf: &mut BytesMut) -> Result<(), WireError> {
        if self.name.len() > u8::MAX as usize {
            return Err(WireError::NameTooLong(self.name.len()));
        }
        buf.put_u16(self.exchange);
        buf.put_u8(self.name.len() as u8);
        buf.put_slice(self.name.as_bytes());
        buf.put_u16(self.instance);
        Ok(())
    }
}

/// An exchange descriptor from a chatnav info reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeInfo {
    /// Exchange number
    pub number: u16,
    /// Exchange name, when advertised
    pub name: Option<String>,
    /// Whether room creation is allowed here
    pub creation_allowed: Option<u8>,
    /// Character set
    pub charset: Option<String>,
    /// Language tag
    pub lang: Option<String>,
}

/// Room-creation acknowledgement from a chatnav info reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomCreated {
    /// Exchange the room lives on
    pub exchange: u16,
    /// Cookie identifying the room in the join request
    pub cookie: Bytes,
    /// Room instance
    pub instance: u16,
    /// Detail level of the reply
    pub detail: u8,
    /// Fully-qualified room name
    pub fq_name: Option<String>,
    /// Room flag bits
    pub flags: Option<u16>,
    /// Creation time (unix)
    pub creation_time: Option<u32>,
    /// Longest message the room accepts
    pub max_msg_len: Option<u16>,
    /// Occupancy cap
    pub max_occupancy: Option<u16>,
    /// Short room name
    pub name: Option<String>,
}

/// Everything a chatnav info reply can carry.
#[derive(Debug, Clone, Default)]
pub struct ChatNavInfo {
    /// Cap on concurrently joined rooms
    pub max_rooms: Option<u8>,
    /// Advertised exchanges
    pub exchanges: Vec<ExchangeInfo>,
    /// Present when the reply acknowledges a room creation
    pub room: Option<RoomCreated>,
}

/// A level-2 room info update (family 0x000e subtype 0x0002).
#[derive(Debug, Clone, Default)]
pub struct RoomUpdate {
    /// Which room this update describes
    pub room: Option<RoomInfo>,
    /// Fully-qualified room name
    pub fq_name: Option<String>,
    /// Server-reported occupant count
    pub occupant_count: Option<u16>,
    /// Occupant user info blocks
    pub occupants: Vec<UserInfo>,
    /// Room flag bits
    pub flags: Option<u16>,
    /// Creation time (unix)
    pub creation_time: Option<u32>,
    /// Longest message the room accepts
    pub max_msg_len: Option<u16>,
    /// Room description
    pub description: Option<String>,
}

/// An incoming chat message (family 0x000e subtype 0x0006).
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Message cookie
    pub cookie: [u8; 8],
    /// Who said it
    pub sender: Option<UserInfo>,
    /// What they said
    pub message: Option<String>,
}

/// Ask the navigator for chat rights (header-only request).
pub async fn request_room_rights(
    disp: &Dispatcher,
    tx: &TxQueue,
    conn: &Arc<Connection>,
) -> Result<u32, SessionError> {
    disp.send_basic(tx, conn, FAMILY_CHATNAV, CHATNAV_REQ_RIGHTS).await
}

/// Ask the navigator to create (or look up) a room on `exchange`.
///
/// The request addresses the literal room "create" at instance 0xFFFF; the
/// real name travels in the TLV block. The name is threaded through the
/// outstanding-request context so the info reply can be tied back to it.
pub async fn create_room(
    disp: &Dispatcher,
    tx: &TxQueue,
    conn: &Arc<Connection>,
    exchange: u16,
    name: &str,
) -> Result<u32, SessionError> {
    let mut body = BytesMut::new();
    RoomInfo {
        exchange,
        name: "create".into(),
        instance: 0xFFFF,
    }
    .write(&mut body)?;
    body.put_u8(0x01); // detail level
    let mut tlvs = TlvChain::new();
    tlvs.append_str(TLV_ROOM_NAME, name);
    tlvs.append_str(TLV_CHARSET, "us-ascii");
    tlvs.append_str(TLV_LANG, "en");
    body.put_u16(tlvs.len() as u16);
    body.put_slice(&tlvs.to_bytes());

    disp.send_request(
        tx,
        conn,
        FAMILY_CHATNAV,
        CHATNAV_CREATE_ROOM,
        0,
        &body,
        Some(Box::new(name.to_string())),
    )
    .await
}

/// Parse a chatnav info reply body.
pub fn parse_chatnav_info(body: &[u8]) -> Result<ChatNavInfo, SessionError> {
    let chain = TlvChain::parse(body);
    let mut info = ChatNavInfo {
        max_rooms: chain.get_u8(TLV_MAX_ROOMS),
        ..ChatNavInfo::default()
    };
    for tlv in chain.iter().filter(|t| t.typ == TLV_EXCHANGE) {
        let mut r = Reader::new(&tlv.value);
        let number = r
            .u16()
            .map_err(|_| SessionError::MalformedFrame("short exchange descriptor"))?;
        let nested = TlvChain::parse(r.rest());
        info.exchanges.push(ExchangeInfo {
            number,
            name: nested.get_str(TLV_ROOM_NAME),
            creation_allowed: nested.get_u8(TLV_CREATE_PERM),
            charset: nested.get_str(TLV_CHARSET),
            lang: nested.get_str(TLV_LANG),
        });
    }
    if let Some(tlv) = chain.get(TLV_ROOM) {
        let mut r = Reader::new(&tlv.value);
        let parse = || -> Result<RoomCreated, WireError> {
            let exchange = r.u16()?;
            let cookie_len = r.u8()? as usize;
            let cookie = Bytes::copy_from_slice(r.bytes(cookie_len)?);
            let instance = r.u16()?;
            let detail = r.u8()?;
            let _tlv_count = r.u16()?;
            let nested = TlvChain::parse(r.rest());
            Ok(RoomCreated {
                exchange,
                cookie,
                instance,
                detail,
                fq_name: nested.get_str(TLV_ROOM_FQN),
                flags: nested.get_u16(TLV_ROOM_FLAGS),
                creation_time: nested.get_u32(TLV_CREATION_TIME),
                max_msg_len: nested.get_u16(TLV_MAX_MSG_LEN),
                max_occupancy: nested.get_u16(TLV_MAX_OCCUPANCY),
                name: nested.get_str(TLV_ROOM_NAME),
            })
        }();
        match parse {
            Ok(room) => info.room = Some(room),
            Err(_) => return Err(SessionError::MalformedFrame("short room block")),
        }
    }
    Ok(info)
}

/// Parse a room info update body. Only detail level 2 carries the full
/// structure; anything else is refused.
pub fn parse_room_update(body: &[u8]) -> Result<RoomUpdate, SessionError> {
    let mut r = Reader::new(body);
    let room = RoomInfo::read(&mut r)
        .map_err(|_| SessionError::MalformedFrame("short room address"))?;
    let detail = r
        .u8()
        .map_err(|_| SessionError::MalformedFrame("missing detail level"))?;
    if detail != 0x02 {
        warn!(detail, "unsupported room info detail level");
        return Err(SessionError::MalformedFrame("unsupported detail level"));
    }
    let _tlv_count = r
        .u16()
        .map_err(|_| SessionError::MalformedFrame("missing tlv count"))?;
    let chain = TlvChain::parse(r.rest());

    let mut update = RoomUpdate {
        room: Some(room),
        fq_name: chain.get_str(TLV_ROOM_FQN),
        occupant_count: chain.get_u16(TLV_OCCUPANT_COUNT),
        flags: chain.get_u16(TLV_ROOM_FLAGS),
        creation_time: chain.get_u32(TLV_CREATION_TIME),
        max_msg_len: chain.get_u16(TLV_MAX_MSG_LEN),
        description: chain.get_str(TLV_ROOM_NAME),
        ..RoomUpdate::default()
    };
    if let Some(tlv) = chain.get(TLV_OCCUPANT_LIST) {
        update.occupants = UserInfo::parse_list(&tlv.value)
            .map_err(|_| SessionError::MalformedFrame("short occupant list"))?;
    }
    Ok(update)
}

/// Parse an occupant join or leave body: user info blocks back to back
/// until the buffer ends.
pub fn parse_occupants(body: &[u8]) -> Result<Vec<UserInfo>, SessionError> {
    UserInfo::parse_list(body).map_err(|_| SessionError::MalformedFrame("short occupant block"))
}

/// Parse an incoming chat message body.
pub fn parse_incoming_message(body: &[u8]) -> Result<ChatMessage, SessionError> {
    let mut r = Reader::new(body);
    let cookie_bytes = r
        .bytes(8)
        .map_err(|_| SessionError::MalformedFrame("short message cookie"))?;
    let mut cookie = [0u8; 8];
    cookie.copy_from_slice(cookie_bytes);
    let channel = r
        .u16()
        .map_err(|_| SessionError::MalformedFrame("missing message channel"))?;
    // Chat rooms only ever speak ICBM channel 3.
    if channel != 0x0003 {
        return Err(SessionError::MalformedFrame("unexpected message channel"));
    }
    let chain = TlvChain::parse(r.rest());
    let sender = match chain.get(0x0003) {
        Some(tlv) => Some(
            UserInfo::parse(&tlv.value)
                .map_err(|_| SessionError::MalformedFrame("short sender info"))?
                .0,
        ),
        None => None,
    };
    let message = chain
        .get(0x0005)
        .and_then(|block| TlvChain::parse(&block.value).get_str(0x0001));
    Ok(ChatMessage {
        cookie,
        sender,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use oscar_wire::Capabilities;

    #[test]
    fn test_room_info_roundtrip() {
        let room = RoomInfo {
            exchange: 4,
            name: "lobby".into(),
            instance: 2,
        };
        let mut buf = BytesMut::new();
        room.write(&mut buf).unwrap();
        let mut r = Reader::new(&buf);
        assert_eq!(RoomInfo::read(&mut r).unwrap(), room);
        assert!(r.is_empty());
    }

    #[test]
    fn test_create_room_body_layout() {
        // Rebuild the body the way create_room does and check the prefix.
        let mut body = BytesMut::new();
        RoomInfo {
            exchange: 4,
            name: "create".into(),
            instance: 0xFFFF,
        }
        .write(&mut body)
        .unwrap();
        body.put_u8(0x01);
        assert_eq!(
            &body[..],
            &[0x00, 0x04, 0x06, b'c', b'r', b'e', b'a', b't', b'e', 0xFF, 0xFF, 0x01]
        );
    }

    #[test]
    fn test_parse_chatnav_info_reply() {
        let mut exchange_val = BytesMut::new();
        exchange_val.put_u16(4);
        let mut nested = TlvChain::new();
        nested.append_str(TLV_ROOM_NAME, "general");
        nested.append_u8(TLV_CREATE_PERM, 1);
        exchange_val.put_slice(&nested.to_bytes());

        let mut room_val = BytesMut::new();
        room_val.put_u16(4);
        room_val.put_u8(4);
        room_val.put_slice(b"ck01");
        room_val.put_u16(0);
        room_val.put_u8(0x02);
        let mut room_tlvs = TlvChain::new();
        room_tlvs.append_str(TLV_ROOM_FQN, "!aol://2719:10-4-lobby");
        room_tlvs.append_u16(TLV_MAX_MSG_LEN, 512);
        room_tlvs.append_u32(TLV_CREATION_TIME, 0x3500_0000);
        room_val.put_u16(room_tlvs.len() as u16);
        room_val.put_slice(&room_tlvs.to_bytes());

        let mut chain = TlvChain::new();
        chain.append_u8(TLV_MAX_ROOMS, 10);
        chain.append(TLV_EXCHANGE, exchange_val.freeze());
        chain.append(TLV_ROOM, room_val.freeze());

        let info = parse_chatnav_info(&chain.to_bytes()).unwrap();
        assert_eq!(info.max_rooms, Some(10));
        assert_eq!(info.exchanges.len(), 1);
        assert_eq!(info.exchanges[0].number, 4);
        assert_eq!(info.exchanges[0].name.as_deref(), Some("general"));
        let room = info.room.unwrap();
        assert_eq!(&room.cookie[..], b"ck01");
        assert_eq!(room.fq_name.as_deref(), Some("!aol://2719:10-4-lobby"));
        assert_eq!(room.max_msg_len, Some(512));
        assert_eq!(room.creation_time, Some(0x3500_0000));
    }

    #[test]
    fn test_parse_room_update() {
        let occupants = [
            UserInfo {
                screen_name: "alice".into(),
                capabilities: Capabilities::CHAT,
                ..UserInfo::default()
            },
            UserInfo {
                screen_name: "bob".into(),
                ..UserInfo::default()
            },
        ];
        let mut packed = BytesMut::new();
        for o in &occupants {
            packed.put_slice(&o.encode().unwrap());
        }

        let mut chain = TlvChain::new();
        chain.append_u16(TLV_OCCUPANT_COUNT, 2);
        chain.append(TLV_OCCUPANT_LIST, packed.freeze());
        chain.append_u32(TLV_CREATION_TIME, 0x3600_0000);
        chain.append_u16(TLV_MAX_MSG_LEN, 1024);

        let mut body = BytesMut::new();
        RoomInfo {
            exchange: 4,
            name: "lobby".into(),
            instance: 0,
        }
        .write(&mut body)
        .unwrap();
        body.put_u8(0x02);
        body.put_u16(chain.len() as u16);
        body.put_slice(&chain.to_bytes());

        let update = parse_room_update(&body).unwrap();
        assert_eq!(update.room.unwrap().name, "lobby");
        assert_eq!(update.occupant_count, Some(2));
        assert_eq!(update.occupants.len(), 2);
        assert_eq!(update.occupants[0].screen_name, "alice");
        assert_eq!(update.max_msg_len, Some(1024));

        // Detail levels other than 2 are refused.
        let detail_off = body.iter().position(|b| *b == 0x02).unwrap();
        let mut wrong = body.clone();
        wrong[detail_off] = 0x01;
        assert!(parse_room_update(&wrong).is_err());
    }

    #[test]
    fn test_parse_incoming_message() {
        let sender = UserInfo {
            screen_name: "carol".into(),
            ..UserInfo::default()
        };
        let mut inner = TlvChain::new();
        inner.append_str(0x0001, "hello room");
        let mut chain = TlvChain::new();
        chain.append(0x0003, sender.encode().unwrap());
        chain.append(0x0005, inner.to_bytes());

        let mut body = BytesMut::new();
        body.put_slice(&[9, 9, 9, 9, 9, 9, 9, 9]);
        body.put_u16(0x0003);
        body.put_slice(&chain.to_bytes());

        let msg = parse_incoming_message(&body).unwrap();
        assert_eq!(msg.cookie, [9u8; 8]);
        assert_eq!(msg.sender.unwrap().screen_name, "carol");
        assert_eq!(msg.message.as_deref(), Some("hello room"));

        // Non-chat ICBM channels are refused.
        let mut wrong = body.clone();
        wrong[9] = 0x01;
        assert!(parse_incoming_message(&wrong).is_err());
    }

    #[test]
    fn test_parse_occupants_join_run() {
        let mut packed = BytesMut::new();
        for name in ["x", "y"] {
            packed.put_slice(
                &UserInfo {
                    screen_name: name.into(),
                    ..UserInfo::default()
                }
                .encode()
                .unwrap(),
            );
        }
        let list = parse_occupants(&packed).unwrap();
        assert_eq!(list.len(), 2);
    }
}

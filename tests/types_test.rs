#[cfg(test)]
mod types_tests {
    use chdkptp::testing::mock_device_info;
    use chdkptp::types::{
        CaptureMode, DeviceFilter, FrameFormat, LuaValue, Message, MessageType,
    };
    use std::collections::BTreeMap;

    #[test]
    fn test_capture_mode_parsing() {
        assert_eq!("record".parse::<CaptureMode>().unwrap(), CaptureMode::Record);
        assert_eq!("rec".parse::<CaptureMode>().unwrap(), CaptureMode::Record);
        assert_eq!("play".parse::<CaptureMode>().unwrap(), CaptureMode::Play);
        assert!("video".parse::<CaptureMode>().is_err());
        assert_eq!(CaptureMode::Record.to_string(), "record");
    }

    #[test]
    fn test_frame_format_parsing() {
        assert_eq!("JPEG".parse::<FrameFormat>().unwrap(), FrameFormat::Jpeg);
        assert_eq!("jpg".parse::<FrameFormat>().unwrap(), FrameFormat::Jpeg);
        assert_eq!("ppm".parse::<FrameFormat>().unwrap(), FrameFormat::Ppm);
        assert!("gif".parse::<FrameFormat>().is_err());
        assert_eq!(FrameFormat::Png.extension(), "png");

        let format: FrameFormat = serde_json::from_str("\"jpg\"").unwrap();
        assert_eq!(format, FrameFormat::Jpeg);
    }

    #[test]
    fn test_message_type_from_wire() {
        assert_eq!(MessageType::from_wire("return"), MessageType::Return);
        assert_eq!(MessageType::from_wire("user"), MessageType::User);
        assert_eq!(MessageType::from_wire("error"), MessageType::Error);
        assert_eq!(MessageType::from_wire("none"), MessageType::None);
        assert_eq!(
            MessageType::from_wire("status"),
            MessageType::Other("status".to_string())
        );
    }

    #[test]
    fn test_message_json() {
        let mut fields = BTreeMap::new();
        fields.insert("exp".to_string(), LuaValue::Integer(12));
        fields.insert("dir".to_string(), LuaValue::from("A/DCIM/100CANON"));
        let message = Message {
            msg_type: MessageType::User,
            script_id: 3,
            value: LuaValue::Table(fields),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["msg_type"], "user");
        assert_eq!(json["script_id"], 3);
        assert_eq!(json["value"]["exp"], 12);
        assert_eq!(json["value"]["dir"], "A/DCIM/100CANON");

        let parsed: Message = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_lua_value_json_shapes() {
        assert_eq!(serde_json::to_string(&LuaValue::Nil).unwrap(), "null");
        let list = LuaValue::List(vec![LuaValue::Integer(1), LuaValue::Boolean(true)]);
        assert_eq!(serde_json::to_string(&list).unwrap(), "[1,true]");

        let parsed: LuaValue = serde_json::from_str("[1, 2.5, \"x\", {}]").unwrap();
        assert_eq!(
            parsed,
            LuaValue::List(vec![
                LuaValue::Integer(1),
                LuaValue::Number(2.5),
                LuaValue::from("x"),
                LuaValue::Table(BTreeMap::new()),
            ])
        );
    }

    #[test]
    fn test_lua_value_accessors() {
        let list = LuaValue::List(vec![LuaValue::Boolean(false), LuaValue::from("failed")]);
        assert_eq!(list.get("2").and_then(LuaValue::as_str), Some("failed"));
        assert_eq!(list.get("0"), None);
        assert_eq!(LuaValue::Integer(7).as_f64(), Some(7.0));
        assert_eq!(LuaValue::from("x").as_i64(), None);
        assert_eq!(LuaValue::Opaque("function".into()).type_name(), "opaque");
        assert_eq!(LuaValue::Bytes(vec![0xff]).type_name(), "string");
    }

    #[test]
    fn test_device_filter() {
        let info = mock_device_info();
        assert!(DeviceFilter::default().matches(&info));

        let filter = DeviceFilter {
            bus_num: Some("001".to_string()),
            device_num: Some("004".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&info));

        let filter = DeviceFilter {
            serial_num: Some("OTHER".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&info));
    }

    #[test]
    fn test_device_info_json() {
        let info = mock_device_info();
        assert_eq!(info.address(), "001:004");
        let json = serde_json::to_string(&info).unwrap();
        let parsed: chdkptp::types::DeviceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }
}

#[cfg(test)]
mod commands_tests {
    use chdkptp::commands::capture::{get_live_frame, get_live_frames, shoot};
    use chdkptp::commands::config::{get_capture_config, get_config, get_transfer_config};
    use chdkptp::commands::devices::{
        connect_device, disconnect_device, find_chdk_devices, get_device_mode,
        is_device_connected, list_chdk_devices, list_connected_devices, reboot_device,
        reconnect_device, register_device, switch_device_mode,
    };
    use chdkptp::commands::files::{
        batch_download, delete_files, download_file, list_files, list_files_detailed,
        make_directory, upload_file,
    };
    use chdkptp::commands::scripting::{
        execute_lua, kill_scripts, read_messages, send_script_message,
    };
    use chdkptp::testing::{mock_context, mock_device, mock_device_info};
    use chdkptp::types::{CaptureMode, DeviceFilter, FrameFormat, LuaValue, MessageType};
    use tempfile::TempDir;

    async fn open_mock() -> String {
        register_device(mock_device().unwrap()).await
    }

    #[tokio::test]
    async fn test_list_and_find_devices() {
        chdkptp::lua::install_global(mock_context().unwrap()).unwrap();

        let devices = list_chdk_devices().await.unwrap();
        assert_eq!(devices, vec![mock_device_info()]);

        let filter = DeviceFilter {
            product_id: Some(0x3218),
            ..Default::default()
        };
        assert_eq!(find_chdk_devices(filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_without_chdkptp_installation() {
        let result = connect_device(mock_device_info()).await;
        let err = result.unwrap_err();
        assert!(err.starts_with("Failed to connect"), "unexpected error: {}", err);
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let handle = open_mock().await;

        let connected = list_connected_devices().await.unwrap();
        let entry = connected.iter().find(|d| d.handle == handle).unwrap();
        assert_eq!(entry.info.model_name, "Canon PowerShot A2200");
        assert!(is_device_connected(handle.clone()).await.unwrap());

        disconnect_device(handle.clone()).await.unwrap();
        let connected = list_connected_devices().await.unwrap();
        assert!(connected.iter().all(|d| d.handle != handle));

        let err = is_device_connected(handle.clone()).await.unwrap_err();
        assert!(err.contains("No open device"));
        assert!(disconnect_device(handle).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let handle = "not-a-handle".to_string();
        assert!(execute_lua(handle.clone(), "1".into(), None, None, None, None)
            .await
            .is_err());
        assert!(list_files(handle.clone(), None).await.is_err());
        assert!(shoot(handle, None).await.is_err());
    }

    #[tokio::test]
    async fn test_execute_lua_and_messages() {
        let handle = open_mock().await;

        let value = execute_lua(handle.clone(), "1 + 2".into(), None, None, None, None)
            .await
            .unwrap();
        assert_eq!(value, LuaValue::Integer(3));

        let value = execute_lua(
            handle.clone(),
            "write_usb_msg('status')".into(),
            Some(false),
            None,
            None,
            None,
        )
        .await
        .unwrap();
        assert!(value.is_nil());

        let messages = read_messages(handle.clone()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].msg_type, MessageType::User);
        assert_eq!(messages[0].value, LuaValue::from("status"));

        send_script_message(handle.clone(), "go".into(), None).await.unwrap();
        let value = execute_lua(handle.clone(), "read_usb_msg()".into(), None, None, None, None)
            .await
            .unwrap();
        assert_eq!(value, LuaValue::from("go"));

        kill_scripts(handle.clone(), None).await.unwrap();
        disconnect_device(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_lua_error_is_reported() {
        let handle = open_mock().await;
        let err = execute_lua(handle.clone(), "a = 1\nb = 2".into(), None, None, None, None)
            .await
            .unwrap_err();
        assert!(err.starts_with("Invalid argument"));
        disconnect_device(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_mode_commands() {
        let handle = open_mock().await;
        assert_eq!(get_device_mode(handle.clone()).await.unwrap(), CaptureMode::Play);
        switch_device_mode(handle.clone(), CaptureMode::Record).await.unwrap();
        assert_eq!(get_device_mode(handle.clone()).await.unwrap(), CaptureMode::Record);

        reconnect_device(handle.clone(), Some(10)).await.unwrap();
        reboot_device(handle.clone(), Some(10), None).await.unwrap();
        assert!(is_device_connected(handle.clone()).await.unwrap());
        disconnect_device(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_file_commands() {
        let handle = open_mock().await;
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("notes.txt");
        std::fs::write(&local, "notes").unwrap();

        // defaults come from the transfer configuration
        let listing = list_files(handle.clone(), None).await.unwrap();
        assert_eq!(listing, vec!["A/DCIM/100CANON/"]);

        let remote = upload_file(handle.clone(), local.to_string_lossy().into(), None, None)
            .await
            .unwrap();
        assert_eq!(remote, "A/notes.txt");

        let data = download_file(handle.clone(), remote.clone(), None).await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"notes"[..]));

        make_directory(handle.clone(), "A/BACKUP".into()).await.unwrap();
        let entries = list_files_detailed(handle.clone(), Some("A".into())).await.unwrap();
        assert!(entries.iter().any(|e| e.path == "A/BACKUP" && e.is_dir));
        assert!(entries.iter().any(|e| e.path == "A/notes.txt" && e.size == Some(5)));

        let out = TempDir::new().unwrap();
        batch_download(
            handle.clone(),
            vec!["A/DCIM".into()],
            out.path().to_string_lossy().into(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(out.path().join("IMG_0001.JPG")).unwrap(), b"JPEG1");

        delete_files(handle.clone(), vec![remote]).await.unwrap();
        let listing = list_files(handle.clone(), Some("A".into())).await.unwrap();
        assert!(!listing.contains(&"A/notes.txt".to_string()));
        disconnect_device(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_capture_commands() {
        let handle = open_mock().await;

        let data = shoot(handle.clone(), None).await.unwrap();
        assert_eq!(data.as_deref(), Some(&b"JPEG-DATA"[..]));

        let frame = get_live_frame(handle.clone(), Some(FrameFormat::Ppm), None)
            .await
            .unwrap();
        assert_eq!((frame.width, frame.height), (4, 4));

        let frames = get_live_frames(handle.clone(), 3, None, None).await.unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].sequence, 3);
        assert_eq!(frames[0].format, FrameFormat::Jpeg);

        assert!(get_live_frames(handle.clone(), 0, None, None).await.is_err());
        assert!(get_live_frames(handle.clone(), 101, None, None).await.is_err());
        disconnect_device(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_config_commands() {
        let config = get_config().await.unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(get_transfer_config().await.unwrap(), config.transfer);
        assert_eq!(get_capture_config().await.unwrap(), config.capture);
    }
}
